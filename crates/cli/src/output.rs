use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::OutputFormat;

/// Writes one JSON result to stdout.
pub fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
	let rendered = match format {
		OutputFormat::Pretty => serde_json::to_string_pretty(value),
		OutputFormat::Json => serde_json::to_string(value),
	}
	.context("Failed to render result")?;

	let mut stdout = std::io::stdout().lock();
	writeln!(stdout, "{rendered}").context("Failed to write to stdout")?;
	stdout.flush().context("Failed to write to stdout")
}
