#![deny(clippy::all)]

use clap::Parser;

mod commands;
mod handlers;
mod telemetry;

use commands::Cli;
use commands::Commands;

fn main() {
    let cli = Cli::parse();
    let _telemetry = telemetry::init_tracing("perfdeck=info");

    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Record(args) => handlers::run_record(args),
        Commands::Probes => handlers::run_probes(),
        Commands::Profile(args) => handlers::run_profile(args),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<perfdeck_config::ConfigError>().is_some() {
        78 // EX_CONFIG
    } else {
        1
    }
}
