//! Subprocess execution behind a narrow, mockable interface.
//!
//! Policy engines never spawn processes themselves; they go through
//! [`CommandRunner`] so tests can count and fake real invocations. The
//! GitHub credential lives only in this module, injected per-invocation
//! and never serialized into responses or logs.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

/// Captured output of a finished (or timed-out) subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Set when the process was killed at the deadline. Timeouts of the
    /// primary command surface as 5xx, not as an ordinary failed run.
    pub timed_out: bool,
}

impl ExecOutcome {
    /// Result shape used when the process could not run or was killed.
    pub fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: 1,
            timed_out: false,
        }
    }

    pub fn timeout(stderr: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::failure(stderr)
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One subprocess invocation: program, argv, cwd, extra env, deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Overlaid on the inherited environment.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: Duration::from_secs(300),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Narrow seam between policy logic and real process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> ExecOutcome;
}

/// Real implementation backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> ExecOutcome {
        let Invocation {
            program,
            args,
            cwd,
            env,
            timeout,
        } = invocation;

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&args)
            .current_dir(&cwd)
            .envs(env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!("failed to spawn {program}: {err}");
                return ExecOutcome::failure(format!("warden: failed to execute {program}: {err}"));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecOutcome {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(1),
                timed_out: false,
            },
            Ok(Err(err)) => {
                warn!("failed to collect output from {program}: {err}");
                ExecOutcome::failure(format!("warden: failed to execute {program}: {err}"))
            }
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped.
                let secs = timeout.as_secs();
                warn!("{program} timed out after {secs}s (cwd={})", cwd.display());
                ExecOutcome::timeout(format!("warden: {program} command timed out after {secs}s"))
            }
        }
    }
}

/// GitHub credential capability, held by the execution layer only.
///
/// The token is deliberately not `Debug`-printable and never appears in
/// argv; git receives it through a short-lived askpass script, gh through
/// its token environment variables.
#[derive(Clone)]
pub struct GithubToken(String);

impl GithubToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Env pairs for `gh` invocations.
    pub(crate) fn gh_env(&self) -> Vec<(String, String)> {
        vec![
            ("GH_TOKEN".to_string(), self.0.clone()),
            ("GITHUB_TOKEN".to_string(), self.0.clone()),
        ]
    }

    /// Write a 0700 askpass script echoing the token, returning the
    /// tempdir guard (the script dies with it) and the script path.
    pub(crate) fn write_askpass(&self) -> std::io::Result<(tempfile::TempDir, PathBuf)> {
        let dir = tempfile::Builder::new().prefix("warden-askpass-").tempdir()?;
        let script = dir.path().join("askpass.sh");
        std::fs::write(&script, format!("#!/bin/sh\necho '{}'\n", self.0))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok((dir, script))
    }
}

impl std::fmt::Debug for GithubToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GithubToken(..)")
    }
}

/// Base environment for git subprocesses: trust workspace directories
/// regardless of ownership (init containers may create the mount as a
/// different uid), fixed author identity, no terminal prompts.
pub(crate) fn git_base_env(user_name: &str, user_email: &str) -> Vec<(String, String)> {
    vec![
        ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
        ("GIT_CONFIG_KEY_0".to_string(), "safe.directory".to_string()),
        ("GIT_CONFIG_VALUE_0".to_string(), "*".to_string()),
        ("GIT_AUTHOR_NAME".to_string(), user_name.to_string()),
        ("GIT_AUTHOR_EMAIL".to_string(), user_email.to_string()),
        ("GIT_COMMITTER_NAME".to_string(), user_name.to_string()),
        ("GIT_COMMITTER_EMAIL".to_string(), user_email.to_string()),
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
    ]
}

/// Base environment for gh subprocesses: gh shells out to git, so it
/// needs the same directory-trust override, and prompts are disabled.
pub(crate) fn gh_base_env() -> Vec<(String, String)> {
    vec![
        ("GH_PROMPT_DISABLED".to_string(), "1".to_string()),
        ("GIT_CONFIG_COUNT".to_string(), "1".to_string()),
        ("GIT_CONFIG_KEY_0".to_string(), "safe.directory".to_string()),
        ("GIT_CONFIG_VALUE_0".to_string(), "*".to_string()),
    ]
}

/// Check if `path` exists; subprocesses fail confusingly on missing cwd.
pub(crate) fn cwd_exists(path: &Path) -> bool {
    path.is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn runs_a_real_command() {
        let runner = ProcessRunner;
        let outcome = runner
            .run(Invocation::new(
                "sh",
                vec!["-c".to_string(), "printf hello".to_string()],
                std::env::temp_dir(),
            ))
            .await;

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_codes_pass_through() {
        let runner = ProcessRunner;
        let outcome = runner
            .run(Invocation::new(
                "sh",
                vec!["-c".to_string(), "exit 3".to_string()],
                std::env::temp_dir(),
            ))
            .await;

        assert_eq!(outcome.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let runner = ProcessRunner;
        let outcome = runner
            .run(
                Invocation::new(
                    "sh",
                    vec!["-c".to_string(), "sleep 30".to_string()],
                    std::env::temp_dir(),
                )
                .timeout(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.timed_out);
        assert!(outcome.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn missing_program_is_a_failure_outcome() {
        let runner = ProcessRunner;
        let outcome = runner
            .run(Invocation::new(
                "warden-no-such-binary",
                vec![],
                std::env::temp_dir(),
            ))
            .await;

        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stderr.contains("failed to execute"));
    }

    #[test]
    fn askpass_script_is_owner_only() {
        let token = GithubToken::new("sekrit");
        let (dir, script) = token.write_askpass().unwrap();
        let contents = std::fs::read_to_string(&script).unwrap();

        assert!(contents.contains("sekrit"));
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
        drop(dir);
        assert!(!script.exists());
    }

    #[test]
    fn token_debug_does_not_leak() {
        let token = GithubToken::new("sekrit");
        assert_eq!(format!("{token:?}"), "GithubToken(..)");
    }
}
