//! `hpcc`: the command line front end for hpc-connect.

mod cli;
mod commands;
mod exec;
mod overrides;

use clap::Parser;
use hpc_connect::Config;

use crate::cli::Cli;
use crate::cli::Command;
use crate::overrides::parse_override;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("hpcc: {error:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    let overrides = cli
        .overrides
        .iter()
        .map(|arg| parse_override(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    config.apply_cli_overrides(&overrides)?;

    if cli.info {
        let backend = hpc_connect::resolve(config.clone())?;
        backend.submission_manager()?;
        println!("{}", serde_yaml_ng::to_string(&config.effective_config())?);
        return Ok(0);
    }

    match cli.command {
        Some(Command::Config(args)) => {
            commands::config::run(args.action, config)?;
            Ok(0)
        }
        Some(Command::Launch(args)) => commands::launch::run(args, config),
        Some(Command::Submit(args)) => commands::submit::run(args, config),
        None => {
            eprintln!("hpcc: no subcommand given, try `hpcc --help`");
            Ok(1)
        }
    }
}
