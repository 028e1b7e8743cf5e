//! Parses a launcher argv into an ordered [`Namespace`] of [`LaunchSpec`]
//! segments.

use indexmap::IndexMap;

/// The canonical, backend-independent process-count flag users type.
///
/// This is intentionally fixed rather than derived from `launch:numproc_flag`:
/// the whole point of the compiler is that callers write one vocabulary
/// (`-n <count>` or `-n=<count>`) and the emitter translates it to whatever
/// spelling (`-n`, `-np`, ...) the target launcher wants.
const NUMPROC_TOKEN: &str = "-n";

/// One segment of an MPMD invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchSpec {
    /// Every token in this segment after mapping, in order: launcher
    /// options, the executable, and its program arguments.
    pub argv: Vec<String>,
    /// The executable and its program arguments only (used by the `srun`
    /// multi-prog emitter, which never emits per-segment launcher flags).
    pub program: Vec<String>,
    /// The requested process count for this segment, if one was given.
    pub processes: Option<u64>,
}

/// An ordered sequence of [`LaunchSpec`] segments, one per `:`-delimited
/// MPMD program.
pub type Namespace = Vec<LaunchSpec>;

/// How a single pre-executable token should be handled after being mapped.
enum MappedToken {
    /// Drop this token only.
    DropOne,
    /// Drop this token and the next raw token.
    DropTwo,
    /// Keep this token (possibly rewritten).
    Keep(String),
}

/// Resolves a single pre-executable token through `mappings`.
///
/// `mappings` values are matched as exact strings: `"SUPPRESS"` drops the
/// token and, only when the flag and its value arrived as two separate
/// tokens, the following token too; `"SUPPRESS="` always drops just the
/// matched token. Any other value is a literal replacement string.
fn resolve_mapping(token: &str, mappings: &IndexMap<String, String>) -> MappedToken {
    let (flag, has_inline_value) = match token.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (token, false),
    };
    match mappings.get(flag) {
        Some(resolution) if resolution == "SUPPRESS" => {
            if has_inline_value { MappedToken::DropOne } else { MappedToken::DropTwo }
        }
        Some(resolution) if resolution == "SUPPRESS=" => MappedToken::DropOne,
        Some(replacement) => MappedToken::Keep(replacement.clone()),
        None => MappedToken::Keep(token.to_string()),
    }
}

/// Recognizes the canonical process-count token, returning its count and
/// the token rewritten with `numproc_flag`.
fn resolve_numproc(token: &str, numproc_flag: &str, next: Option<&str>) -> Option<(u64, String, bool)> {
    if let Some(value) = token.strip_prefix(&format!("{NUMPROC_TOKEN}=")) {
        let count: u64 = value.parse().ok()?;
        return Some((count, format!("{numproc_flag}={count}"), false));
    }
    if token == NUMPROC_TOKEN {
        let count: u64 = next?.parse().ok()?;
        return Some((count, numproc_flag.to_string(), true));
    }
    None
}

/// Parses `argv` into a [`Namespace`].
///
/// `is_executable` decides when a launcher-options segment transitions into
/// program arguments; production callers pass a `PATH`-backed predicate
/// (e.g. `|token| which::which(token).is_ok()`), tests inject a fixed set.
pub fn parse(
    argv: &[String],
    mappings: &IndexMap<String, String>,
    numproc_flag: &str,
    is_executable: impl Fn(&str) -> bool,
) -> Namespace {
    let mut namespace = Namespace::new();
    let mut segment = LaunchSpec::default();
    let mut seen_exec = false;

    let mut i = 0;
    while i < argv.len() {
        let token = &argv[i];

        if token == ":" {
            namespace.push(std::mem::take(&mut segment));
            seen_exec = false;
            i += 1;
            continue;
        }

        if seen_exec {
            segment.argv.push(token.clone());
            segment.program.push(token.clone());
            i += 1;
            continue;
        }

        if let Some((count, rewritten, consumed_next)) =
            resolve_numproc(token, numproc_flag, argv.get(i + 1).map(String::as_str))
        {
            segment.processes = Some(count);
            segment.argv.push(rewritten);
            i += if consumed_next { 2 } else { 1 };
            continue;
        }

        match resolve_mapping(token, mappings) {
            MappedToken::DropOne => {
                i += 1;
            }
            MappedToken::DropTwo => {
                i += 2;
            }
            MappedToken::Keep(mapped) => {
                if is_executable(&mapped) {
                    seen_exec = true;
                    segment.argv.push(mapped.clone());
                    segment.program.push(mapped);
                } else {
                    segment.argv.push(mapped);
                }
                i += 1;
            }
        }
    }

    namespace.push(segment);
    namespace
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec(names: &'static [&'static str]) -> impl Fn(&str) -> bool {
        move |token| names.contains(&token)
    }

    fn strs(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_segment_no_colon() {
        let argv = strs(&["-n", "4", "-flag", "file", "executable", "--option"]);
        let namespace = parse(&argv, &IndexMap::new(), "-n", exec(&["executable"]));
        assert_eq!(namespace.len(), 1);
        assert_eq!(namespace[0].processes, Some(4));
        assert_eq!(namespace[0].argv, strs(&["-n", "4", "-flag", "file", "executable", "--option"]));
    }

    #[test]
    fn numproc_flag_rewrites_emitted_token() {
        let argv = strs(&["-n", "4", "-flag", "file", "executable", "--option"]);
        let namespace = parse(&argv, &IndexMap::new(), "-np", exec(&["executable"]));
        assert_eq!(namespace[0].argv, strs(&["-np", "4", "-flag", "file", "executable", "--option"]));
    }

    #[test]
    fn mpmd_splits_on_colon() {
        let argv = strs(&["-n", "4", "-flag", "file", "ls", ":", "-n", "5", "ls", "-la"]);
        let namespace = parse(&argv, &IndexMap::new(), "-n", exec(&["ls"]));
        assert_eq!(namespace.len(), 2);
        assert_eq!(namespace[0].processes, Some(4));
        assert_eq!(namespace[0].argv, strs(&["-n", "4", "-flag", "file", "ls"]));
        assert_eq!(namespace[0].program, strs(&["ls"]));
        assert_eq!(namespace[1].processes, Some(5));
        assert_eq!(namespace[1].argv, strs(&["-n", "5", "ls", "-la"]));
        assert_eq!(namespace[1].program, strs(&["ls", "-la"]));
    }

    #[test]
    fn suppress_mapping_with_and_without_inline_value() {
        let mut mappings = IndexMap::new();
        mappings.insert("--x".to_string(), "SUPPRESS".to_string());
        let argv = strs(&["--x", "4", "--x=5", "-n=7", "ls"]);
        let namespace = parse(&argv, &mappings, "-np", exec(&["ls"]));
        assert_eq!(namespace.len(), 1);
        assert_eq!(namespace[0].processes, Some(7));
        assert_eq!(namespace[0].argv, strs(&["-np=7", "ls"]));
    }

    #[test]
    fn suppress_equals_only_drops_one_token() {
        let mut mappings = IndexMap::new();
        mappings.insert("--x".to_string(), "SUPPRESS=".to_string());
        let argv = strs(&["--x", "4", "ls"]);
        let namespace = parse(&argv, &mappings, "-n", exec(&["ls"]));
        // Only `--x` is dropped; `4` survives as an ordinary launcher option.
        assert_eq!(namespace[0].argv, strs(&["4", "ls"]));
    }

    #[test]
    fn replacement_mapping_rewrites_token() {
        let mut mappings = IndexMap::new();
        mappings.insert("--old".to_string(), "--new".to_string());
        let argv = strs(&["--old", "ls"]);
        let namespace = parse(&argv, &mappings, "-n", exec(&["ls"]));
        assert_eq!(namespace[0].argv, strs(&["--new", "ls"]));
    }
}
