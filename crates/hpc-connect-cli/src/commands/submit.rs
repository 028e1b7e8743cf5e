//! Implementation of the `submit` subcommand.

use hpc_connect::Config;
use hpc_connect_config::ConfigValue;

use crate::cli::RunArgs;
use crate::exec::run_or_print;

/// Runs the `submit` subcommand: prepends `submit:default_options` to
/// `args.argv` and either prints the resulting command (`--dryrun`) or execs
/// it in place.
pub fn run(args: RunArgs, config: Config) -> anyhow::Result<i32> {
    let default_options = config
        .get("submit:default_options", None, None)?
        .and_then(|value| value.as_list().map(<[ConfigValue]>::to_vec))
        .unwrap_or_default()
        .iter()
        .filter_map(|entry| entry.as_str().map(str::to_string))
        .collect::<Vec<_>>();

    let Some((program, rest)) = args.argv.split_first() else {
        anyhow::bail!("nothing to submit: empty command line");
    };
    let mut argv = vec![program.clone()];
    argv.extend(default_options);
    argv.extend(rest.iter().cloned());

    run_or_print(&argv, args.dryrun)
}
