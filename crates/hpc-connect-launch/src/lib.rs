//! The launcher argument compiler.
//!
//! Translates the backend-independent argv a caller writes for `launch`
//! (`-n <count> prog --flag : -n <count> prog2 ...`) into a concrete
//! `mpiexec` or `srun` command line, substituting `%(key)s` resource-view
//! placeholders from `launch:default_options` / `launch:pre_options` /
//! `launch:program_opts` and applying the `launch:mappings` table to
//! suppress or rewrite launcher-specific flags.

mod emit;
mod parser;
mod template;

use hpc_connect_job::HpcConnectError;
use hpc_connect_resource::ResourceView;
use indexmap::IndexMap;

pub use emit::LaunchCommand;
pub use emit::OptionLists;
pub use parser::LaunchSpec;
pub use parser::Namespace;
pub use parser::parse;
pub use template::expand;
pub use template::expand_all;

/// Which concrete launcher a [`JobSpec`]'s `launch:exec` configuration names.
///
/// [`JobSpec`]: hpc_connect_job::JobSpec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launcher {
    /// Open MPI / MPICH-style `mpiexec`.
    Mpiexec,
    /// Slurm's `srun`.
    Srun,
}

impl Launcher {
    /// Classifies a `launch:exec` binary name.
    ///
    /// Anything not recognized as `srun` is treated as `mpiexec`-compatible,
    /// matching the vast majority of MPI launchers (`mpiexec`, `mpirun`,
    /// vendor-prefixed variants).
    pub fn classify(exec: &str) -> Launcher {
        match exec.rsplit('/').next().unwrap_or(exec) {
            "srun" => Launcher::Srun,
            _ => Launcher::Mpiexec,
        }
    }
}

/// Compiles a raw launcher argv into a concrete [`LaunchCommand`].
///
/// `default_options`/`pre_options`/`program_opts` are the raw,
/// not-yet-expanded config templates; they are percent-expanded against
/// `view` before being threaded into the emitted command. `multi_prog_path`
/// is only consulted when `exec` resolves to `srun` and the namespace is
/// MPMD.
#[allow(clippy::too_many_arguments)]
pub fn compile(
    exec: &str,
    argv: &[String],
    mappings: &IndexMap<String, String>,
    numproc_flag: &str,
    default_options: &[String],
    pre_options: &[String],
    program_opts: &[String],
    view: &ResourceView,
    multi_prog_path: &str,
    is_executable: impl Fn(&str) -> bool,
) -> Result<LaunchCommand, HpcConnectError> {
    let namespace = parser::parse(argv, mappings, numproc_flag, is_executable);
    let options = OptionLists {
        default_options: template::expand_all(default_options, view)?,
        pre_options: template::expand_all(pre_options, view)?,
        program_opts: template::expand_all(program_opts, view)?,
    };
    Ok(match Launcher::classify(exec) {
        Launcher::Mpiexec => emit::mpiexec(exec, &namespace, &options),
        Launcher::Srun => emit::srun(exec, &namespace, &options, multi_prog_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hpc_connect_resource::ResourceSpec;
    use hpc_connect_resource::ResourceTree;

    fn view(ranks: u64) -> ResourceView {
        ResourceTree::new(vec![ResourceSpec::new("node", 1)
            .with_child(ResourceSpec::new("cpu", 16))])
            .unwrap()
            .resource_view(Some(ranks), None)
            .unwrap()
    }

    fn strs(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn scenario_one_mpiexec_passthrough() {
        let argv = strs(&["-n", "4", "-flag", "file", "executable", "--option"]);
        let command = compile(
            "mpiexec",
            &argv,
            &IndexMap::new(),
            "-n",
            &[],
            &[],
            &[],
            &view(4),
            "launch-multi-prog.conf",
            |token| token == "executable",
        )
        .unwrap();
        assert_eq!(
            command.argv,
            strs(&["mpiexec", "-n", "4", "-flag", "file", "executable", "--option"])
        );
    }

    #[test]
    fn scenario_five_suppress_and_numproc_rewrite() {
        let mut mappings = IndexMap::new();
        mappings.insert("--x".to_string(), "SUPPRESS".to_string());
        let argv = strs(&["--x", "4", "--x=5", "-n=7", "ls"]);
        let command = compile(
            "mpiexec",
            &argv,
            &mappings,
            "-np",
            &[],
            &[],
            &[],
            &view(7),
            "launch-multi-prog.conf",
            |token| token == "ls",
        )
        .unwrap();
        assert_eq!(command.argv, strs(&["mpiexec", "-np=7", "ls"]));
    }

    #[test]
    fn srun_classification_by_basename() {
        assert_eq!(Launcher::classify("srun"), Launcher::Srun);
        assert_eq!(Launcher::classify("/usr/bin/srun"), Launcher::Srun);
        assert_eq!(Launcher::classify("mpiexec"), Launcher::Mpiexec);
        assert_eq!(Launcher::classify("/opt/mpi/bin/mpiexec.hydra"), Launcher::Mpiexec);
    }

    #[test]
    fn default_options_are_percent_expanded() {
        let argv = strs(&["ls"]);
        let command = compile(
            "mpiexec",
            &argv,
            &IndexMap::new(),
            "-n",
            &["-genv".to_string(), "I_MPI_PIN=%(ranks)s".to_string()],
            &[],
            &[],
            &view(4),
            "launch-multi-prog.conf",
            |token| token == "ls",
        )
        .unwrap();
        assert_eq!(command.argv, strs(&["mpiexec", "-genv", "I_MPI_PIN=4", "ls"]));
    }
}
