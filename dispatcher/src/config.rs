//! Process-wide dispatcher configuration.
//!
//! Loaded once at startup from the environment and immutable thereafter.
//! The shape mirrors what the policy engines consume: repository URL,
//! git identity, pre-push hook list, commit footer, and timeouts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::exec::GithubToken;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_WORKSPACE_ROOT: &str = "/workspaces";
const DEFAULT_GIT_USER_NAME: &str = "warden";
const DEFAULT_GIT_USER_EMAIL: &str = "warden@localhost";

/// Default pre-push hook: scan the repository history for secrets.
/// `--max-depth` rather than `--since-commit` so shallow clones work.
const DEFAULT_PRE_PUSH_HOOKS: &[&str] =
    &["trufflehog git file://. --max-depth=10 --fail --no-update"];

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub bind_addr: SocketAddr,
    /// Root under which per-branch workspaces live
    /// (`<workspace_root>/<branch>`).
    pub workspace_root: PathBuf,
    /// Clone URL of the single repository this deployment serves.
    pub repo_url: String,
    pub git_user_name: String,
    pub git_user_email: String,
    /// Shell commands run in the workspace before every push.
    pub pre_push_hooks: Vec<String>,
    /// Extra trailer appended to commit messages, empty to disable.
    pub commit_footer: String,
    /// Timeout for git/gh subprocesses.
    pub command_timeout: Duration,
    /// Timeout for each pre-push hook.
    pub hook_timeout: Duration,
    /// Timeout for quick repository queries (`rev-parse` and friends).
    pub query_timeout: Duration,
}

impl DispatcherConfig {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// The GitHub token is returned separately so it can be handed to the
    /// execution layer and nowhere else.
    pub fn from_env() -> anyhow::Result<(Self, Option<GithubToken>)> {
        let bind_addr = env_or("WARDEN_BIND_ADDR", DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(|err| anyhow::anyhow!("invalid WARDEN_BIND_ADDR: {err}"))?;

        let pre_push_hooks = match std::env::var("PRE_PUSH_HOOKS") {
            Ok(raw) => serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|err| anyhow::anyhow!("PRE_PUSH_HOOKS must be a JSON array: {err}"))?,
            Err(_) => DEFAULT_PRE_PUSH_HOOKS
                .iter()
                .map(|hook| (*hook).to_string())
                .collect(),
        };

        let token = std::env::var("GITHUB_PAT")
            .ok()
            .filter(|token| !token.is_empty())
            .map(GithubToken::new);

        let config = Self {
            bind_addr,
            workspace_root: PathBuf::from(env_or("WORKSPACE_ROOT", DEFAULT_WORKSPACE_ROOT)),
            repo_url: env_or("REPO_URL", ""),
            git_user_name: env_or("GIT_USER_NAME", DEFAULT_GIT_USER_NAME),
            git_user_email: env_or("GIT_USER_EMAIL", DEFAULT_GIT_USER_EMAIL),
            pre_push_hooks,
            commit_footer: env_or("COMMIT_FOOTER", ""),
            command_timeout: Duration::from_secs(300),
            hook_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(10),
        };
        Ok((config, token))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            repo_url: String::new(),
            git_user_name: DEFAULT_GIT_USER_NAME.to_string(),
            git_user_email: DEFAULT_GIT_USER_EMAIL.to_string(),
            pre_push_hooks: DEFAULT_PRE_PUSH_HOOKS
                .iter()
                .map(|hook| (*hook).to_string())
                .collect(),
            commit_footer: String::new(),
            command_timeout: Duration::from_secs(300),
            hook_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(10),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
