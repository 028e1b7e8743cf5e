//! Implementation of the `launch` subcommand.

use hpc_connect::Config;
use hpc_connect_resource::ResourceView;

use crate::cli::RunArgs;
use crate::exec::run_or_print;

/// Runs the `launch` subcommand: compiles `args.argv` into a concrete
/// `mpiexec`/`srun` command line and either prints it (`--dryrun`) or execs
/// it in place.
pub fn run(args: RunArgs, config: Config) -> anyhow::Result<i32> {
    let backend = hpc_connect::resolve(config.clone())?;
    let launcher = backend.launcher()?;
    let ranks = launcher.total_processes(&args.argv);
    let view = config
        .resources()?
        .resource_view(Some(ranks), None)
        .unwrap_or(ResourceView { np: ranks, ranks, ranks_per_socket: ranks, nodes: 1, sockets: 1 });
    let command = launcher.compile(&args.argv, &view)?;
    run_or_print(&command.argv, args.dryrun)
}
