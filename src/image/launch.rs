/// Env entries with this prefix carry a command-line override.
pub const CMD_MARKER: &str = "cmd=";

/// Environment and command split out of a descriptor's env list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArgs {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
}

impl LaunchArgs {
    /// Pull `cmd=` entries out of `vars`.
    ///
    /// The remainder of every `cmd=` entry is split on single spaces and
    /// appended to the command, in order. Everything else passes through as
    /// environment, in order.
    pub fn partition<S: AsRef<str>>(vars: &[S]) -> Self {
        let mut args = Self::default();
        for var in vars {
            let var = var.as_ref();
            match var.strip_prefix(CMD_MARKER) {
                Some(rest) => args.cmd.extend(rest.split(' ').map(str::to_string)),
                None => args.env.push(var.to_string()),
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_cmd_entry_extracted() {
        let args = LaunchArgs::partition(&["cmd=foo bar", "A=1"]);
        assert_eq!(args.cmd, vec!["foo", "bar"]);
        assert_eq!(args.env, vec!["A=1"]);
    }

    #[test]
    fn test_no_cmd_entries_pass_through() {
        let args = LaunchArgs::partition(&["A=1", "B=2"]);
        assert!(args.cmd.is_empty());
        assert_eq!(args.env, vec!["A=1", "B=2"]);
    }

    #[test]
    fn test_multiple_cmd_entries_concatenate() {
        let args = LaunchArgs::partition(&[
            "cmd=-jar DynamoDBLocal.jar",
            "X=y",
            "cmd=-inMemory -sharedDb",
        ]);
        assert_eq!(
            args.cmd,
            vec!["-jar", "DynamoDBLocal.jar", "-inMemory", "-sharedDb"]
        );
        assert_eq!(args.env, vec!["X=y"]);
    }

    #[test]
    fn test_marker_only_matches_prefix() {
        let args = LaunchArgs::partition(&["MY_cmd=1"]);
        assert!(args.cmd.is_empty());
        assert_eq!(args.env, vec!["MY_cmd=1"]);
    }

    #[test]
    fn test_empty_list() {
        let args = LaunchArgs::partition::<&str>(&[]);
        assert_eq!(args, LaunchArgs::default());
    }
}
