//! Branch-isolation checks for git commands.
//!
//! All checks here are pure over the argv and the repository's current
//! branch; the engine supplies the latter and executes the verdict.

use crate::classify::subcommand;

/// Target branch of a `checkout`/`switch`, if the argv names one.
pub fn checkout_target(args: &[String]) -> Option<&str> {
    let cmd = subcommand(args)?;
    if cmd != "checkout" && cmd != "switch" {
        return None;
    }
    let mut seen_cmd = false;
    for arg in args {
        if arg == "checkout" || arg == "switch" {
            seen_cmd = true;
            continue;
        }
        if seen_cmd && !arg.starts_with('-') {
            return Some(arg);
        }
    }
    None
}

/// Warning emitted when a switch moves off the assigned branch. The
/// command still executes; only commits and pushes elsewhere are blocked.
pub fn branch_switch_warning(args: &[String], assigned_branch: &str) -> Option<String> {
    let target = checkout_target(args)?;
    if target == assigned_branch {
        return None;
    }
    Some(format!(
        "warden: you are now viewing branch '{target}'.\n\
         Your assigned branch is '{assigned_branch}'.\n\
         Commits and pushes to other branches are not permitted.\n"
    ))
}

/// Denial for merge/rebase/cherry-pick off the assigned branch.
pub fn merge_denial(
    current_branch: Option<&str>,
    assigned_branch: &str,
    cmd: &str,
) -> Option<String> {
    if current_branch == Some(assigned_branch) {
        return None;
    }
    Some(format!(
        "warden: you can only {cmd} while on your assigned branch '{assigned_branch}'.\n\
         Run 'git checkout {assigned_branch}' first.\n"
    ))
}

/// Every `<local>:<remote>` refspec in a push argv. A push may carry
/// several; each one is a destination in its own right.
pub fn push_refspecs(args: &[String]) -> impl Iterator<Item = (&str, &str)> {
    args.iter()
        .filter(|arg| !arg.starts_with('-'))
        .filter_map(|arg| arg.split_once(':'))
}

/// Denial for a push that would escape the assigned branch.
///
/// Every syntactic form is held to the same invariant: the current
/// branch, each refspec's remote side, each refspec's local side (when
/// it is not `HEAD`), and each positional branch must all be the
/// assigned branch.
pub fn push_denial(
    args: &[String],
    current_branch: Option<&str>,
    assigned_branch: &str,
) -> Option<String> {
    if current_branch != Some(assigned_branch) {
        let current = current_branch.unwrap_or("(detached HEAD)");
        return Some(format!(
            "warden: you can only push from your assigned branch '{assigned_branch}'.\n\
             Current branch is '{current}'.\n"
        ));
    }

    for (local, remote) in push_refspecs(args) {
        if !remote.is_empty() && remote != assigned_branch {
            return Some(format!(
                "warden: you can only push to branch '{assigned_branch}'\n"
            ));
        }
        if !local.is_empty() && local != "HEAD" && local != assigned_branch {
            return Some(format!(
                "warden: you can only push your assigned branch '{assigned_branch}'\n"
            ));
        }
    }

    // `push origin <branch>...` without refspecs: each positional branch
    // is both source and destination.
    for target in push_positional_branches(args) {
        if target != assigned_branch && target != "HEAD" {
            return Some(format!(
                "warden: you can only push to branch '{assigned_branch}'\n"
            ));
        }
    }

    None
}

/// Non-flag arguments after `push` and the remote (the branches in
/// `push origin <branch>...`), ignoring refspecs.
fn push_positional_branches(args: &[String]) -> impl Iterator<Item = &str> {
    args.iter()
        .skip_while(|arg| arg.as_str() != "push")
        .skip(1)
        .filter(|arg| !arg.starts_with('-') && !arg.contains(':'))
        .skip(1)
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|arg| (*arg).to_string()).collect()
    }

    #[test]
    fn checkout_target_variants() {
        assert_eq!(checkout_target(&argv(&["checkout", "feature"])), Some("feature"));
        assert_eq!(
            checkout_target(&argv(&["checkout", "-b", "new-branch"])),
            Some("new-branch")
        );
        assert_eq!(checkout_target(&argv(&["switch", "main"])), Some("main"));
        assert_eq!(
            checkout_target(&argv(&["switch", "-c", "new-branch"])),
            Some("new-branch")
        );
        assert_eq!(checkout_target(&argv(&["branch", "feature"])), None);
        assert_eq!(checkout_target(&argv(&["status"])), None);
    }

    #[test]
    fn switch_to_assigned_branch_is_quiet() {
        assert_eq!(
            branch_switch_warning(&argv(&["checkout", "feature"]), "feature"),
            None
        );
    }

    #[test]
    fn switch_away_warns() {
        let warning = branch_switch_warning(&argv(&["checkout", "main"]), "feature");
        assert!(warning.is_some_and(|w| w.contains("viewing branch 'main'")));
    }

    #[test]
    fn merge_allowed_only_on_assigned_branch() {
        assert_eq!(merge_denial(Some("feature"), "feature", "merge"), None);
        assert!(merge_denial(Some("main"), "feature", "merge").is_some());
        assert!(merge_denial(None, "feature", "rebase").is_some());
    }

    #[test]
    fn push_refspec_extraction() {
        assert_eq!(
            push_refspecs(&argv(&["push", "origin", "local:remote"])).collect::<Vec<_>>(),
            vec![("local", "remote")]
        );
        assert_eq!(
            push_refspecs(&argv(&["push", "origin", "HEAD:feature", "a:b"])).collect::<Vec<_>>(),
            vec![("HEAD", "feature"), ("a", "b")]
        );
        assert_eq!(push_refspecs(&argv(&["push", "origin"])).count(), 0);
        // Flags with colons are not refspecs.
        assert_eq!(
            push_refspecs(&argv(&["push", "--push-option=a:b", "origin"])).count(),
            0
        );
    }

    #[test]
    fn push_from_wrong_branch_denied() {
        let denial = push_denial(&argv(&["push", "origin"]), Some("main"), "feature");
        assert!(denial.is_some_and(|d| d.contains("Current branch is 'main'")));
    }

    #[test]
    fn push_from_detached_head_denied() {
        let denial = push_denial(&argv(&["push", "origin"]), None, "feature");
        assert!(denial.is_some_and(|d| d.contains("detached HEAD")));
    }

    #[test]
    fn push_refspec_to_foreign_branch_denied() {
        for args in [
            vec!["push", "origin", "feature:main"],
            vec!["push", "origin", "HEAD:main"],
        ] {
            let denial = push_denial(&argv(&args), Some("feature"), "feature");
            assert!(denial.is_some(), "{args:?}");
        }
    }

    #[test]
    fn push_of_foreign_local_branch_denied() {
        let denial = push_denial(
            &argv(&["push", "origin", "main:feature"]),
            Some("feature"),
            "feature",
        );
        assert!(denial.is_some());
    }

    #[test]
    fn push_second_refspec_to_foreign_branch_denied() {
        for args in [
            vec!["push", "origin", "feature:feature", "HEAD:main"],
            vec!["push", "origin", "HEAD:feature", "feature:main"],
            vec!["push", "origin", "feature:feature", "main:main"],
        ] {
            let denial = push_denial(&argv(&args), Some("feature"), "feature");
            assert!(denial.is_some(), "{args:?}");
        }
    }

    #[test]
    fn push_extra_positional_branch_denied() {
        for args in [
            vec!["push", "origin", "feature", "main"],
            vec!["push", "origin", "feature:feature", "main"],
        ] {
            let denial = push_denial(&argv(&args), Some("feature"), "feature");
            assert!(denial.is_some(), "{args:?}");
        }
    }

    #[test]
    fn push_positional_foreign_branch_denied() {
        let denial = push_denial(&argv(&["push", "origin", "main"]), Some("feature"), "feature");
        assert!(denial.is_some());
    }

    #[test]
    fn well_formed_pushes_allowed() {
        for args in [
            vec!["push", "origin"],
            vec!["push", "origin", "feature"],
            vec!["push", "origin", "feature:feature"],
            vec!["push", "origin", "HEAD:feature"],
            vec!["push", "origin", "feature:feature", "HEAD:feature"],
            vec!["push", "--force-with-lease", "origin", "feature"],
            vec!["push"],
        ] {
            assert_eq!(push_denial(&argv(&args), Some("feature"), "feature"), None, "{args:?}");
        }
    }
}
