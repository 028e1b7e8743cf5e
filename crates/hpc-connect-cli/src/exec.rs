//! Runs a compiled command line in place, or prints it for `--dryrun`.

use std::process::Command;

/// Prints `argv` (space-joined, roughly shell-quoted) if `dryrun`, otherwise
/// runs it to completion and returns its exit code.
///
/// On POSIX this execs in place, replacing the current process so signals
/// and stdio pass through untouched; on other platforms it spawns a child
/// and relays its exit status, since there is no in-place exec to use.
pub fn run_or_print(argv: &[String], dryrun: bool) -> anyhow::Result<i32> {
    if dryrun {
        println!("{}", shlex::try_join(argv.iter().map(String::as_str))?);
        return Ok(0);
    }
    let Some((program, rest)) = argv.split_first() else {
        anyhow::bail!("nothing to run: empty command line");
    };

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let error = Command::new(program).args(rest).exec();
        anyhow::bail!("failed to exec `{program}`: {error}");
    }

    #[cfg(not(unix))]
    {
        let status = Command::new(program).args(rest).status()?;
        Ok(status.code().unwrap_or(1))
    }
}
