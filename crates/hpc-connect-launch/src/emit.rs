//! Turns a parsed [`Namespace`] into a concrete `mpiexec` or `srun` command
//! line, plus (for `srun` MPMD) the `--multi-prog` configuration file body.

use crate::parser::Namespace;

/// The config-supplied option lists that bracket the user's own launcher
/// options, already percent-expanded against the job's [`ResourceView`].
///
/// [`ResourceView`]: hpc_connect_resource::ResourceView
#[derive(Debug, Clone, Default)]
pub struct OptionLists {
    /// Options placed immediately after the launcher binary, before
    /// anything user-supplied.
    pub default_options: Vec<String>,
    /// Options placed after the user's launcher options but before the
    /// executable.
    pub pre_options: Vec<String>,
    /// Options placed after the executable and its own arguments.
    pub program_opts: Vec<String>,
}

/// A fully emitted launcher invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchCommand {
    /// The argv to execute, with `argv[0]` the launcher binary itself.
    pub argv: Vec<String>,
    /// For `srun` MPMD, the contents of the `--multi-prog` config file that
    /// must be written to the path referenced in `argv` before running it.
    pub multi_prog_file: Option<String>,
}

/// Emits an `mpiexec` command line.
///
/// SPMD namespaces (a single segment) produce a flat argv; MPMD namespaces
/// join each segment's own launch options with a literal `:` token, mirroring
/// the way the caller wrote it on the command line.
pub fn mpiexec(exec: &str, namespace: &Namespace, options: &OptionLists) -> LaunchCommand {
    let mut argv = vec![exec.to_string()];
    argv.extend(options.default_options.iter().cloned());

    for (index, segment) in namespace.iter().enumerate() {
        if index > 0 {
            argv.push(":".to_string());
        }
        argv.extend(segment.argv.iter().cloned());
    }

    argv.extend(options.pre_options.iter().cloned());
    argv.extend(options.program_opts.iter().cloned());

    LaunchCommand { argv, multi_prog_file: None }
}

/// Emits an `srun` command line.
///
/// A single-segment namespace is emitted directly; a multi-segment (MPMD)
/// namespace is instead flattened into one `-n<total>` invocation backed by
/// a `--multi-prog` configuration file at `multi_prog_path`, since `srun`
/// has no `mpiexec`-style `:` syntax of its own.
pub fn srun(
    exec: &str,
    namespace: &Namespace,
    options: &OptionLists,
    multi_prog_path: &str,
) -> LaunchCommand {
    if namespace.len() == 1 {
        let segment = &namespace[0];
        let mut argv = vec![exec.to_string()];
        argv.extend(options.default_options.iter().cloned());
        argv.extend(segment.argv.iter().cloned());
        argv.extend(options.pre_options.iter().cloned());
        argv.extend(options.program_opts.iter().cloned());
        return LaunchCommand { argv, multi_prog_file: None };
    }

    let total: u64 = namespace.iter().map(|segment| segment.processes.unwrap_or(1)).sum();

    let mut lines = Vec::with_capacity(namespace.len());
    let mut offset = 0u64;
    for segment in namespace {
        let processes = segment.processes.unwrap_or(1);
        let range = if processes <= 1 {
            offset.to_string()
        } else {
            format!("{}-{}", offset, offset + processes - 1)
        };
        lines.push(format!("{} {}", range, segment.program.join(" ")));
        offset += processes;
    }

    let mut argv = vec![exec.to_string()];
    argv.extend(options.default_options.iter().cloned());
    argv.extend(options.pre_options.iter().cloned());
    argv.push(format!("-n{total}"));
    argv.push("--multi-prog".to_string());
    argv.push(multi_prog_path.to_string());
    argv.extend(options.program_opts.iter().cloned());

    LaunchCommand { argv, multi_prog_file: Some(lines.join("\n") + "\n") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::LaunchSpec;

    fn spec(argv: &[&str], program: &[&str], processes: Option<u64>) -> LaunchSpec {
        LaunchSpec {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            program: program.iter().map(|s| s.to_string()).collect(),
            processes,
        }
    }

    #[test]
    fn mpiexec_spmd() {
        let namespace = vec![spec(&["-n", "4", "ls", "-la"], &["ls", "-la"], Some(4))];
        let command = mpiexec("mpiexec", &namespace, &OptionLists::default());
        assert_eq!(command.argv, vec!["mpiexec", "-n", "4", "ls", "-la"]);
        assert!(command.multi_prog_file.is_none());
    }

    #[test]
    fn mpiexec_mpmd_joins_with_colon() {
        let namespace =
            vec![spec(&["-n", "4", "a"], &["a"], Some(4)), spec(&["-n", "5", "b"], &["b"], Some(5))];
        let command = mpiexec("mpiexec", &namespace, &OptionLists::default());
        assert_eq!(command.argv, vec!["mpiexec", "-n", "4", "a", ":", "-n", "5", "b"]);
    }

    #[test]
    fn srun_spmd_passthrough() {
        let namespace = vec![spec(&["-n", "4", "ls"], &["ls"], Some(4))];
        let command = srun("srun", &namespace, &OptionLists::default(), "unused.conf");
        assert_eq!(command.argv, vec!["srun", "-n", "4", "ls"]);
        assert!(command.multi_prog_file.is_none());
    }

    #[test]
    fn srun_mpmd_builds_multi_prog_file() {
        let namespace = vec![
            spec(&["-n", "4", "a", "--flag"], &["a", "--flag"], Some(4)),
            spec(&["-n", "1", "b"], &["b"], Some(1)),
        ];
        let command = srun("srun", &namespace, &OptionLists::default(), "launch-multi-prog.conf");
        assert_eq!(command.argv, vec!["srun", "-n5", "--multi-prog", "launch-multi-prog.conf"]);
        assert_eq!(command.multi_prog_file.as_deref(), Some("0-3 a --flag\n4 b\n"));
    }
}
