//! Renders the common submission-script skeleton shared by every
//! script-based backend (Slurm, PBS, local, remote).

use std::fs;

use hpc_connect_job::HpcConnectError;
use hpc_connect_job::JobSpec;
use hpc_connect_job::JobSpecUpdate;

/// Builds the script body: shebang, scheduler directives, default options,
/// the job's own `submit_args`, environment exports/unsets, then the job's
/// commands, one per line.
pub fn render(
    spec: &JobSpec,
    directives: &[String],
    default_options: &[String],
) -> String {
    let mut lines = vec!["#!/bin/sh".to_string()];
    lines.extend(directives.iter().cloned());
    lines.extend(default_options.iter().cloned());
    lines.extend(spec.submit_args.iter().cloned());

    for (name, value) in &spec.env {
        match value {
            Some(value) => lines.push(format!("export {name}=\"{value}\"")),
            None => lines.push(format!("unset {name}")),
        }
    }

    lines.extend(spec.commands.iter().cloned());
    lines.push(String::new());
    lines.join("\n")
}

/// Renders the script into `spec.workspace`, makes it executable, and
/// returns a spec whose `commands` is the single script path.
///
/// This is the `prepare` operation every script-based adapter shares.
pub fn prepare(
    spec: &JobSpec,
    directives: &[String],
    default_options: &[String],
) -> Result<JobSpec, HpcConnectError> {
    spec.validate_for_submission()?;
    fs::create_dir_all(&spec.workspace)?;
    let script_path = spec.script_path();
    let body = render(spec, directives, default_options);
    fs::write(&script_path, body)?;

    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, Permissions::from_mode(0o750))?;
    }

    spec.with_updates(JobSpecUpdate {
        commands: Some(vec![script_path.display().to_string()]),
        ..Default::default()
    })
}

/// Writes `<file_name>` (`submit.meta.json`/`qsub.meta.json`) into `spec.workspace`,
/// recording the submit command line, the current time, and the combined
/// stdout/stderr the submit command produced.
pub fn write_submission_meta(
    spec: &JobSpec,
    file_name: &str,
    args: &[String],
    stdout_stderr: &str,
) -> Result<(), HpcConnectError> {
    let meta = serde_json::json!({
        "meta": {
            "args": args.join(" "),
            "date": chrono::Utc::now().format("%c").to_string(),
            "stdout/stderr": stdout_stderr,
        }
    });
    fs::write(spec.workspace.join(file_name), serde_json::to_vec_pretty(&meta).expect("meta json is always serializable"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn renders_directives_and_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = IndexMap::new();
        env.insert("FOO".to_string(), Some("bar".to_string()));
        env.insert("BAZ".to_string(), None);

        let spec = JobSpec::new("job", vec!["echo hi".to_string()], 60.0, dir.path())
            .unwrap()
            .with_updates(JobSpecUpdate {
                cpus: Some(Some(4)),
                env: Some(env),
                ..Default::default()
            })
            .unwrap();

        let body = render(&spec, &["#SBATCH --nodes=1".to_string()], &[]);
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.contains("#SBATCH --nodes=1"));
        assert!(body.contains("export FOO=\"bar\""));
        assert!(body.contains("unset BAZ"));
        assert!(body.trim_end().ends_with("echo hi"));
    }

    #[test]
    fn prepare_writes_executable_script() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::new("job", vec!["echo hi".to_string()], 60.0, dir.path())
            .unwrap()
            .with_updates(JobSpecUpdate { cpus: Some(Some(1)), ..Default::default() })
            .unwrap();

        let prepared = prepare(&spec, &[], &[]).unwrap();
        assert_eq!(prepared.commands, vec![spec.script_path().display().to_string()]);
        assert!(spec.script_path().exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(spec.script_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o750);
        }
    }

    #[test]
    fn write_submission_meta_records_args_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let spec = JobSpec::new("job", vec!["echo hi".to_string()], 60.0, dir.path())
            .unwrap()
            .with_updates(JobSpecUpdate { cpus: Some(Some(1)), ..Default::default() })
            .unwrap();

        write_submission_meta(&spec, "submit.meta.json", &["sbatch".to_string(), "job.sh".to_string()], "Submitted batch job 42\n")
            .unwrap();

        let contents = fs::read_to_string(dir.path().join("submit.meta.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["meta"]["args"], "sbatch job.sh");
        assert_eq!(value["meta"]["stdout/stderr"], "Submitted batch job 42\n");
        assert!(value["meta"]["date"].is_string());
    }
}
