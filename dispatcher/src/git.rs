//! Git and gh command execution with policy enforcement.
//!
//! [`GitEngine`] is the only place argv, branch policy, hooks, and
//! credentials meet. Handlers in `server` stay thin: identity in,
//! [`CommandOutcome`] out.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing::warn;

use crate::classify::GitCommandClass;
use crate::classify::classify;
use crate::classify::subcommand;
use crate::config::DispatcherConfig;
use crate::exec::CommandRunner;
use crate::exec::ExecOutcome;
use crate::exec::GithubToken;
use crate::exec::Invocation;
use crate::exec::cwd_exists;
use crate::exec::gh_base_env;
use crate::exec::git_base_env;
use crate::gh_classify::GhCommandClass;
use crate::gh_classify::classify_gh;
use crate::hooks::run_pre_push_hooks;
use crate::paths::translate_cwd;
use crate::paths::workspace_dir;
use crate::policy;

/// Outcome of one dispatched command.
pub enum CommandOutcome {
    /// The real binary ran; this is its captured output.
    Executed(ExecOutcome),
    /// Policy refused the command before any subprocess was spawned.
    Denied { message: String },
}

impl CommandOutcome {
    fn denied(message: impl Into<String>) -> Self {
        Self::Denied {
            message: message.into(),
        }
    }
}

pub struct GitEngine {
    runner: Arc<dyn CommandRunner>,
    config: Arc<DispatcherConfig>,
    token: Option<GithubToken>,
}

impl GitEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: Arc<DispatcherConfig>,
        token: Option<GithubToken>,
    ) -> Self {
        Self {
            runner,
            config,
            token,
        }
    }

    /// Dispatch a git argv on behalf of the pod assigned `branch`.
    pub async fn handle_git(
        &self,
        branch: &str,
        args: Vec<String>,
        agent_cwd: &str,
    ) -> CommandOutcome {
        let cwd = translate_cwd(&self.config.workspace_root, agent_cwd, branch);
        if !cwd_exists(&cwd) {
            return CommandOutcome::denied(format!(
                "warden: workspace for branch '{branch}' does not exist; bootstrap it first\n"
            ));
        }

        let (class, denial) = classify(&args);
        let cmd = subcommand(&args).unwrap_or("").to_string();
        match class {
            GitCommandClass::Denied => {
                let message = denial.unwrap_or("warden: command not permitted");
                info!("git denied (branch={branch}, cmd={cmd})");
                CommandOutcome::denied(format!("{message}\n"))
            }
            GitCommandClass::Unknown => {
                info!("git denied (branch={branch}, cmd={cmd}, reason=unrecognized)");
                CommandOutcome::denied(format!(
                    "warden: git command '{cmd}' is not permitted\n"
                ))
            }
            GitCommandClass::Local => {
                let args = self.with_commit_footer(args);
                CommandOutcome::Executed(self.run_git(args, &cwd, false).await)
            }
            GitCommandClass::Branch => {
                let warning = policy::branch_switch_warning(&args, branch);
                let mut outcome = self.run_git(args, &cwd, false).await;
                if let Some(warning) = warning
                    && outcome.success()
                {
                    outcome.stderr = format!("{warning}{}", outcome.stderr);
                }
                CommandOutcome::Executed(outcome)
            }
            GitCommandClass::Merge => {
                let current = self.current_branch(&cwd).await;
                if let Some(message) = policy::merge_denial(current.as_deref(), branch, &cmd) {
                    info!("git denied (branch={branch}, cmd={cmd}, reason=off_branch)");
                    return CommandOutcome::denied(message);
                }
                CommandOutcome::Executed(self.run_git(args, &cwd, false).await)
            }
            GitCommandClass::RemoteRead => {
                CommandOutcome::Executed(self.run_git(args, &cwd, true).await)
            }
            GitCommandClass::RemoteWrite => self.handle_push(branch, args, &cwd).await,
        }
    }

    async fn handle_push(&self, branch: &str, args: Vec<String>, cwd: &Path) -> CommandOutcome {
        let current = self.current_branch(cwd).await;
        if let Some(message) = policy::push_denial(&args, current.as_deref(), branch) {
            info!("push denied (branch={branch}, reason=branch_policy)");
            return CommandOutcome::denied(message);
        }

        if let Some(failure) = run_pre_push_hooks(
            &self.runner,
            &self.config.pre_push_hooks,
            cwd,
            self.config.hook_timeout,
        )
        .await
        {
            warn!("push aborted by hook (branch={branch}, hook={})", failure.command);
            return CommandOutcome::denied(failure.message());
        }

        CommandOutcome::Executed(self.run_git(args, cwd, true).await)
    }

    /// Dispatch a gh argv on behalf of the pod assigned `branch`.
    pub async fn handle_gh(
        &self,
        branch: &str,
        args: Vec<String>,
        agent_cwd: &str,
    ) -> CommandOutcome {
        let cwd = translate_cwd(&self.config.workspace_root, agent_cwd, branch);
        if !cwd_exists(&cwd) {
            return CommandOutcome::denied(format!(
                "warden: workspace for branch '{branch}' does not exist; bootstrap it first\n"
            ));
        }

        let (class, denial) = classify_gh(&args);
        match class {
            GhCommandClass::Blocked => {
                let message = denial.unwrap_or("warden: gh command not permitted");
                info!("gh denied (branch={branch}, args={args:?})");
                CommandOutcome::denied(format!("{message}\n"))
            }
            GhCommandClass::Unknown => {
                info!("gh denied (branch={branch}, args={args:?}, reason=unrecognized)");
                CommandOutcome::denied(
                    "warden: this gh command is not on the allowed list\n",
                )
            }
            GhCommandClass::Allowed => {
                let mut invocation = Invocation::new("gh", args, cwd)
                    .timeout(self.config.command_timeout);
                for (key, value) in gh_base_env() {
                    invocation = invocation.env(key, value);
                }
                if let Some(token) = &self.token {
                    for (key, value) in token.gh_env() {
                        invocation = invocation.env(key, value);
                    }
                }
                CommandOutcome::Executed(self.runner.run(invocation).await)
            }
        }
    }

    /// The workspace's current branch, `None` for detached HEAD or on
    /// query failure.
    async fn current_branch(&self, cwd: &Path) -> Option<String> {
        let invocation = Invocation::new(
            "git",
            vec![
                "rev-parse".to_string(),
                "--abbrev-ref".to_string(),
                "HEAD".to_string(),
            ],
            cwd,
        )
        .timeout(self.config.query_timeout);
        let outcome = self.runner.run(invocation).await;
        if !outcome.success() {
            return None;
        }
        let branch = outcome.stdout.trim();
        if branch.is_empty() || branch == "HEAD" {
            None
        } else {
            Some(branch.to_string())
        }
    }

    /// Append the configured footer as an extra message paragraph on
    /// commits that already carry an inline message. Editor-based
    /// commits cannot happen here (no terminal), so those fail on their
    /// own.
    fn with_commit_footer(&self, mut args: Vec<String>) -> Vec<String> {
        if self.config.commit_footer.is_empty() {
            return args;
        }
        let is_commit = subcommand(&args) == Some("commit");
        let has_message = args
            .iter()
            .any(|arg| arg == "-m" || arg == "--message" || arg.starts_with("--message="));
        if is_commit && has_message {
            args.push("-m".to_string());
            args.push(self.config.commit_footer.clone());
        }
        args
    }

    async fn run_git(&self, args: Vec<String>, cwd: &Path, with_auth: bool) -> ExecOutcome {
        let mut invocation = Invocation::new("git", args, cwd)
            .timeout(self.config.command_timeout);
        for (key, value) in
            git_base_env(&self.config.git_user_name, &self.config.git_user_email)
        {
            invocation = invocation.env(key, value);
        }

        // The askpass tempdir must outlive the subprocess.
        let mut askpass_guard = None;
        if with_auth && let Some(token) = &self.token {
            match token.write_askpass() {
                Ok((dir, script)) => {
                    invocation = invocation
                        .env("GIT_ASKPASS", script.display().to_string())
                        .env("GIT_USERNAME", "x-access-token");
                    askpass_guard = Some(dir);
                }
                Err(err) => {
                    return ExecOutcome::failure(format!(
                        "warden: failed to prepare credentials: {err}"
                    ));
                }
            }
        }

        let outcome = self.runner.run(invocation).await;
        drop(askpass_guard);
        outcome
    }

    /// Run a git command directly in `cwd`, outside any pod policy.
    /// Used by the bootstrapper, which acts on its own authority.
    pub(crate) async fn run_git_privileged(
        &self,
        args: Vec<String>,
        cwd: &Path,
        with_auth: bool,
    ) -> ExecOutcome {
        self.run_git(args, cwd, with_auth).await
    }

    pub(crate) fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub(crate) fn workspace_dir(&self, branch: &str) -> PathBuf {
        workspace_dir(&self.config.workspace_root, branch)
    }

    pub(crate) async fn current_branch_in(&self, cwd: &Path) -> Option<String> {
        self.current_branch(cwd).await
    }
}
