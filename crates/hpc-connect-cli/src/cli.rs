//! `hpcc` argument parsing.

use clap::Parser;
use clap::Subcommand;

/// Portable submission and launch wrapper for Slurm, PBS, Flux, and local
/// subprocess execution.
#[derive(Parser, Debug)]
#[command(name = "hpcc", author, version, about)]
pub struct Cli {
    /// A config override, `section:key:[subkey:…]:value`. Repeatable.
    #[arg(short = 'c', long = "config", value_name = "PATH:VALUE")]
    pub overrides: Vec<String>,

    /// Print the resolved backend and effective configuration, then exit.
    #[arg(long)]
    pub info: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// The `hpcc` subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or modify the layered configuration.
    Config(ConfigArgs),
    /// Compile and run an `mpiexec`/`srun` invocation.
    Launch(RunArgs),
    /// Compile and run an `sbatch`/`qsub` invocation.
    Submit(RunArgs),
}

/// Arguments shared by `launch` and `submit`: print the compiled command
/// instead of running it, and the raw launcher/submit argv.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Print the rewritten command instead of running it.
    #[arg(long)]
    pub dryrun: bool,

    /// The raw argv to compile, taken verbatim after `--`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub argv: Vec<String>,
}

/// Arguments for the `config` subcommand.
#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// The `config` subcommand's actions.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Prints a scope's configuration (or the merged effective config).
    Show {
        /// The scope to print; omit for the fully merged effective config.
        #[arg(long)]
        scope: Option<String>,
    },
    /// Writes `path:value` into the named scope.
    Add {
        /// The scope to write into.
        #[arg(long)]
        scope: String,
        /// The `section:key:[subkey:…]:value` entry to add.
        entry: String,
    },
}
