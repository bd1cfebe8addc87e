//! runtarget CLI: get-or-create ML environments and compute targets.

use clap::Parser;
use runtarget::logging::{self, LogFormat};

#[derive(Parser, Debug)]
#[command(
    name = "runtarget",
    version,
    about = "Declarative ML environments and compute targets, resolved get-or-create against a workspace registry"
)]
struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: runtarget::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format);
    if let Err(e) = runtarget::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
