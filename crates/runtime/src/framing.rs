//! Newline framing for the IPC socket.
//!
//! A single read may carry several frames, or only part of one. [`LineBuffer`]
//! accumulates bytes and hands back complete lines, keeping the unterminated
//! tail for the next read.

use crate::error::{Error, Result};

/// Upper bound on a single frame; a peer that never sends `\n` cannot grow the buffer past this.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Accumulates raw socket bytes and splits them on `\n`.
#[derive(Debug)]
pub struct LineBuffer {
	buf: Vec<u8>,
	max_len: usize,
}

impl Default for LineBuffer {
	fn default() -> Self {
		Self::new()
	}
}

impl LineBuffer {
	pub fn new() -> Self {
		Self::with_max_len(MAX_FRAME_LEN)
	}

	pub fn with_max_len(max_len: usize) -> Self {
		Self { buf: Vec::new(), max_len }
	}

	/// Appends `bytes` and returns every complete, non-blank line.
	///
	/// Each item is either a frame (without its terminator, `\r` trimmed) or a
	/// protocol error for a frame that is not UTF-8 or exceeds the size limit.
	/// A bad frame is dropped; the frames after it are still returned.
	pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
		self.buf.extend_from_slice(bytes);
		let mut lines = Vec::new();

		while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
			let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
			line.pop();
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			if line.iter().all(u8::is_ascii_whitespace) {
				continue;
			}
			if line.len() > self.max_len {
				lines.push(Err(Error::Protocol(format!("frame of {} bytes exceeds limit of {}", line.len(), self.max_len))));
				continue;
			}
			lines.push(String::from_utf8(line).map_err(|e| Error::Protocol(format!("frame is not valid UTF-8: {e}"))));
		}

		if self.buf.len() > self.max_len {
			let dropped = self.buf.len();
			self.buf.clear();
			lines.push(Err(Error::Protocol(format!("unterminated frame of {dropped} bytes exceeds limit of {}", self.max_len))));
		}

		lines
	}

	/// Bytes of the partial frame still waiting for its terminator.
	pub fn pending_len(&self) -> usize {
		self.buf.len()
	}

	pub fn is_empty(&self) -> bool {
		self.buf.is_empty()
	}
}
