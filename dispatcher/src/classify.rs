//! Git command classification.
//!
//! Pure and total: every argv maps to exactly one class, with anything
//! unrecognized falling through to [`GitCommandClass::Unknown`], which
//! the policy engine treats as a denial.

/// Policy tier for a git invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitCommandClass {
    /// No restrictions beyond path translation.
    Local,
    /// Executes, but warns when switching away from the assigned branch.
    Branch,
    /// Only permitted while on the assigned branch.
    Merge,
    /// fetch/pull, executed with injected credentials.
    RemoteRead,
    /// push: full branch enforcement plus pre-push hooks.
    RemoteWrite,
    /// Blocked with an explanatory message.
    Denied,
    /// Not recognized; blocked by default.
    Unknown,
}

const LOCAL: &[&str] = &[
    "add",
    "rm",
    "mv",
    "status",
    "log",
    "diff",
    "show",
    "commit",
    "stash",
    "reset",
    "restore",
    "rev-parse",
    "ls-files",
    "blame",
    "shortlog",
    "describe",
    "tag",
    "clean",
];

const BRANCH: &[&str] = &["branch", "checkout", "switch"];

const MERGE: &[&str] = &["merge", "rebase", "cherry-pick"];

const REMOTE_READ: &[&str] = &["fetch", "pull"];

const DENIED: &[(&str, &str)] = &[
    ("remote", "warden: remote management is not permitted"),
    (
        "clone",
        "warden: clone is not permitted; use the provided workspace",
    ),
    ("submodule", "warden: submodules are not supported"),
    (
        "credential",
        "warden: credential management is not permitted",
    ),
    (
        "config",
        "warden: direct git configuration is not permitted.\n\
         User identity and settings are managed via deployment configuration.",
    ),
];

const URL_PUSH_DENIAL: &str =
    "warden: pushing to a URL is not permitted; push to the configured remote";

/// First non-flag token of the argv.
pub fn subcommand(args: &[String]) -> Option<&str> {
    args.iter()
        .map(String::as_str)
        .find(|arg| !arg.starts_with('-'))
}

/// Classify a git argv. The denial message is set only for
/// [`GitCommandClass::Denied`].
pub fn classify(args: &[String]) -> (GitCommandClass, Option<&'static str>) {
    let Some(cmd) = subcommand(args) else {
        return (GitCommandClass::Unknown, None);
    };

    if let Some((_, message)) = DENIED.iter().find(|(denied, _)| *denied == cmd) {
        return (GitCommandClass::Denied, Some(message));
    }

    if cmd == "push" {
        // A push whose destination is a URL rather than a configured
        // remote name bypasses branch-isolation enforcement entirely, so
        // it is categorically denied rather than treated as RemoteWrite.
        if has_url_target(args) {
            return (GitCommandClass::Denied, Some(URL_PUSH_DENIAL));
        }
        return (GitCommandClass::RemoteWrite, None);
    }

    if LOCAL.contains(&cmd) {
        (GitCommandClass::Local, None)
    } else if BRANCH.contains(&cmd) {
        (GitCommandClass::Branch, None)
    } else if MERGE.contains(&cmd) {
        (GitCommandClass::Merge, None)
    } else if REMOTE_READ.contains(&cmd) {
        (GitCommandClass::RemoteRead, None)
    } else {
        (GitCommandClass::Unknown, None)
    }
}

/// Whether any non-flag argument after `push` is URL-shaped.
fn has_url_target(args: &[String]) -> bool {
    args.iter()
        .skip_while(|arg| arg.as_str() != "push")
        .skip(1)
        .filter(|arg| !arg.starts_with('-'))
        .any(|arg| is_url_like(arg))
}

fn is_url_like(arg: &str) -> bool {
    arg.contains("://") || (arg.contains('@') && arg.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn subcommand_skips_flags() {
        assert_eq!(subcommand(&argv(&["status"])), Some("status"));
        assert_eq!(subcommand(&argv(&["commit", "-m", "msg"])), Some("commit"));
        assert_eq!(subcommand(&argv(&["--version"])), None);
        assert_eq!(subcommand(&argv(&[])), None);
    }

    #[test]
    fn local_commands_classify_local() {
        for cmd in LOCAL {
            let (class, message) = classify(&argv(&[cmd]));
            assert_eq!(class, GitCommandClass::Local, "{cmd}");
            assert_eq!(message, None);
        }
    }

    #[test]
    fn local_with_arguments_stays_local() {
        let (class, _) = classify(&argv(&["log", "--oneline", "-10"]));
        assert_eq!(class, GitCommandClass::Local);
        let (class, _) = classify(&argv(&["commit", "-m", "test message"]));
        assert_eq!(class, GitCommandClass::Local);
    }

    #[test]
    fn branch_and_merge_commands() {
        for cmd in BRANCH {
            assert_eq!(classify(&argv(&[cmd])).0, GitCommandClass::Branch, "{cmd}");
        }
        for cmd in MERGE {
            assert_eq!(classify(&argv(&[cmd])).0, GitCommandClass::Merge, "{cmd}");
        }
    }

    #[test]
    fn remote_commands() {
        assert_eq!(classify(&argv(&["fetch"])).0, GitCommandClass::RemoteRead);
        assert_eq!(classify(&argv(&["pull", "origin"])).0, GitCommandClass::RemoteRead);
        assert_eq!(
            classify(&argv(&["push", "origin", "feature"])).0,
            GitCommandClass::RemoteWrite
        );
    }

    #[test]
    fn denied_commands_carry_messages_regardless_of_flags() {
        for (cmd, _) in DENIED {
            let (class, message) = classify(&argv(&[cmd]));
            assert_eq!(class, GitCommandClass::Denied, "{cmd}");
            assert!(message.is_some(), "{cmd}");

            let (class, _) = classify(&argv(&["--no-pager", cmd, "-v"]));
            assert_eq!(class, GitCommandClass::Denied, "{cmd} with flags");
        }
    }

    #[test]
    fn unknown_commands_default_unknown() {
        assert_eq!(classify(&argv(&["bisect"])).0, GitCommandClass::Unknown);
        assert_eq!(classify(&argv(&["gc"])).0, GitCommandClass::Unknown);
        assert_eq!(classify(&argv(&[])).0, GitCommandClass::Unknown);
    }

    #[test]
    fn push_to_url_is_denied() {
        for target in [
            "https://github.com/owner/repo.git",
            "http://github.com/owner/repo.git",
            "git@github.com:owner/repo.git",
            "ssh://git@github.com/owner/repo.git",
        ] {
            let (class, message) = classify(&argv(&["push", target]));
            assert_eq!(class, GitCommandClass::Denied, "{target}");
            assert_eq!(message, Some(URL_PUSH_DENIAL));
        }
    }

    #[test]
    fn push_to_url_is_denied_even_with_branch_argument() {
        let (class, _) = classify(&argv(&["push", "https://github.com/o/r.git", "feature"]));
        assert_eq!(class, GitCommandClass::Denied);
    }

    #[test]
    fn push_to_remote_name_is_remote_write() {
        for args in [
            vec!["push", "origin"],
            vec!["push", "origin", "feature"],
            vec!["push", "origin", "HEAD:feature"],
            vec!["push", "--force", "origin"],
        ] {
            assert_eq!(classify(&argv(&args)).0, GitCommandClass::RemoteWrite, "{args:?}");
        }
    }
}
