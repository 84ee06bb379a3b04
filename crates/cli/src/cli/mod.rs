
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Args, Parser, Subcommand, ValueEnum};

const HELP_STYLES: Styles = Styles::styled()
	.header(AnsiColor::Green.on_default().bold())
	.usage(AnsiColor::Green.on_default().bold())
	.literal(AnsiColor::Cyan.on_default().bold())
	.placeholder(AnsiColor::Cyan.on_default())
	.error(AnsiColor::Red.on_default().bold())
	.invalid(AnsiColor::Yellow.on_default().bold());

#[derive(Parser, Debug)]
#[command(name = "bridgeline")]
#[command(about = "Dev-bridge between browser sessions and local tools")]
#[command(version)]
#[command(styles = HELP_STYLES)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// JSON config file; BRIDGELINE_SOCKET and BRIDGELINE_PORT override it
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// How JSON results are printed
	#[arg(short = 'f', long, global = true, value_enum, default_value = "pretty")]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Indented JSON
	#[default]
	Pretty,
	/// One JSON document per line
	Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the hub and the IPC control socket until interrupted
	Serve(ServeArgs),
	/// Send one IPC request and print the response data
	Send(SendArgs),
	/// List connected browser sessions
	Clients(ClientArgs),
	/// Connect as a session and print everything the hub sends
	Watch(WatchArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
	/// Interface for the WebSocket hub
	#[arg(long)]
	pub host: Option<String>,

	/// Port for the WebSocket hub (0 picks a free port)
	#[arg(long)]
	pub port: Option<u16>,

	/// Path of the IPC socket
	#[arg(long, value_name = "PATH")]
	pub socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
	/// Request type, e.g. `get_clients` or a command for the active session
	#[arg(value_name = "TYPE")]
	pub kind: String,

	/// Request payload as JSON
	#[arg(long, value_name = "JSON")]
	pub data: Option<String>,

	#[arg(long, default_value = "web")]
	pub target: String,

	#[arg(long, default_value = "mcp")]
	pub source: String,

	/// Override the configured request timeout
	#[arg(long, value_name = "MS")]
	pub timeout_ms: Option<u64>,

	/// Path of the IPC socket
	#[arg(long, value_name = "PATH")]
	pub socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
	/// Path of the IPC socket
	#[arg(long, value_name = "PATH")]
	pub socket: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
	/// Hub URL; defaults to the configured host and port
	#[arg(long, value_name = "URL")]
	pub url: Option<String>,

	/// Session id announced with ownership requests
	#[arg(long, value_name = "ID")]
	pub session: Option<String>,

	/// Ownership request sent once connected
	#[command(flatten)]
	pub claim: ClaimArgs,
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct ClaimArgs {
	/// Become master unless another session already is
	#[arg(long)]
	pub claim_master: bool,

	/// Become master, evicting the current one
	#[arg(long)]
	pub force_master: bool,

	/// Become the session commands are forwarded to
	#[arg(long)]
	pub take_ownership: bool,
}
