//! GitHub CLI command classification.
//!
//! Unlike git, `gh`'s surface area is enumerable, so this is a flat
//! allowlist over (command, subcommand) pairs with explicit denial
//! messages for the dangerous operations and a default of deny.

/// Policy tier for a gh invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhCommandClass {
    Allowed,
    Blocked,
    /// Not recognized; blocked by default.
    Unknown,
}

/// Allowed (command, subcommands) pairs. An empty subcommand list means
/// every subcommand of that command is allowed.
const ALLOWED: &[(&str, &[&str])] = &[
    (
        "issue",
        &["create", "list", "view", "comment", "edit", "status", "close", "reopen"],
    ),
    (
        "pr",
        &[
            "create", "list", "view", "comment", "edit", "diff", "checks", "status",
            "checkout", "close",
        ],
    ),
    ("repo", &["view", "list", "clone"]),
    ("search", &["issues", "prs", "repos", "code", "commits"]),
    ("gist", &["create", "list", "view", "edit"]),
    ("browse", &[]),
    ("status", &[]),
    ("run", &["list", "view", "watch"]),
    ("label", &["list", "create", "edit"]),
    (
        "project",
        &["list", "view", "create", "edit", "field-list", "item-list", "item-add"],
    ),
];

/// Explicitly blocked (command, subcommand, message) triples.
const BLOCKED: &[(&str, &str, &str)] = &[
    (
        "pr",
        "merge",
        "warden: merging PRs is not permitted. Open a PR for human review instead.",
    ),
    ("repo", "delete", "warden: deleting repositories is not permitted."),
    ("repo", "create", "warden: creating repositories is not permitted."),
    ("repo", "edit", "warden: editing repository settings is not permitted."),
    ("repo", "rename", "warden: renaming repositories is not permitted."),
    ("repo", "archive", "warden: archiving repositories is not permitted."),
    ("release", "delete", "warden: deleting releases is not permitted."),
    ("secret", "set", "warden: managing secrets is not permitted."),
    ("secret", "delete", "warden: managing secrets is not permitted."),
    ("secret", "list", "warden: accessing secrets is not permitted."),
    ("ssh-key", "add", "warden: managing SSH keys is not permitted."),
    ("ssh-key", "delete", "warden: managing SSH keys is not permitted."),
    ("ssh-key", "list", "warden: listing SSH keys is not permitted."),
    ("gpg-key", "add", "warden: managing GPG keys is not permitted."),
    ("gpg-key", "delete", "warden: managing GPG keys is not permitted."),
    ("auth", "login", "warden: authentication is managed by the sandbox."),
    ("auth", "logout", "warden: authentication is managed by the sandbox."),
    ("auth", "setup-git", "warden: git authentication is managed by the sandbox."),
    ("auth", "refresh", "warden: authentication is managed by the sandbox."),
    ("config", "set", "warden: gh configuration is managed by the sandbox."),
    ("config", "clear-cache", "warden: gh configuration is managed by the sandbox."),
    ("variable", "set", "warden: managing variables is not permitted."),
    ("variable", "delete", "warden: managing variables is not permitted."),
    ("variable", "list", "warden: accessing variables is not permitted."),
];

/// Commands blocked entirely, every subcommand.
const FULLY_BLOCKED: &[(&str, &str)] = &[
    (
        "api",
        "warden: direct API access is not permitted. Use specific gh commands instead.",
    ),
    ("extension", "warden: managing extensions is not permitted."),
    ("alias", "warden: managing aliases is not permitted."),
];

/// First two non-flag tokens: (command, subcommand).
pub fn gh_subcommand(args: &[String]) -> (Option<&str>, Option<&str>) {
    let mut words = args
        .iter()
        .map(String::as_str)
        .filter(|arg| !arg.starts_with('-'));
    (words.next(), words.next())
}

/// Classify a gh argv. The denial message is set only for
/// [`GhCommandClass::Blocked`].
pub fn classify_gh(args: &[String]) -> (GhCommandClass, Option<&'static str>) {
    let (main_cmd, sub_cmd) = gh_subcommand(args);
    let Some(main_cmd) = main_cmd else {
        return (GhCommandClass::Unknown, None);
    };

    if let Some((_, message)) = FULLY_BLOCKED.iter().find(|(cmd, _)| *cmd == main_cmd) {
        return (GhCommandClass::Blocked, Some(message));
    }

    if let Some(sub_cmd) = sub_cmd
        && let Some((_, _, message)) = BLOCKED
            .iter()
            .find(|(cmd, sub, _)| *cmd == main_cmd && *sub == sub_cmd)
    {
        return (GhCommandClass::Blocked, Some(message));
    }

    if let Some((_, subs)) = ALLOWED.iter().find(|(cmd, _)| *cmd == main_cmd) {
        if subs.is_empty() {
            return (GhCommandClass::Allowed, None);
        }
        if let Some(sub_cmd) = sub_cmd
            && subs.contains(&sub_cmd)
        {
            return (GhCommandClass::Allowed, None);
        }
        // Known command, unlisted subcommand: allowlist semantics.
        return (GhCommandClass::Unknown, None);
    }

    (GhCommandClass::Unknown, None)
}
