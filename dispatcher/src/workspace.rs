//! Workspace bootstrapping.
//!
//! Each branch gets a directory under the workspace root. Bootstrapping
//! is idempotent: it converges the directory on "cloned repository,
//! checked out on the branch" and reports which action it took. A
//! directory with files but no repository is reported as corrupt and
//! never adopted or repaired automatically; silently reusing unknown
//! files would let one pod's leftovers leak into another's branch.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::error::DispatcherError;
use crate::git::GitEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    /// Directory missing or empty.
    Empty,
    /// A git repository is present.
    Initialized,
    /// Files present but no `.git`.
    Corrupt,
}

/// What `bootstrap` found or did, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub workspace: PathBuf,
    pub branch: String,
    pub action: &'static str,
    pub cloned: bool,
}

pub fn inspect(dir: &Path) -> WorkspaceState {
    if dir.join(".git").is_dir() {
        return WorkspaceState::Initialized;
    }
    match std::fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                WorkspaceState::Corrupt
            } else {
                WorkspaceState::Empty
            }
        }
        Err(_) => WorkspaceState::Empty,
    }
}

pub struct Bootstrapper {
    engine: Arc<GitEngine>,
}

impl Bootstrapper {
    pub fn new(engine: Arc<GitEngine>) -> Self {
        Self { engine }
    }

    pub async fn bootstrap(&self, branch: &str) -> Result<BootstrapOutcome, DispatcherError> {
        let workspace = self.engine.workspace_dir(branch);
        match inspect(&workspace) {
            WorkspaceState::Corrupt => Err(DispatcherError::WorkspaceCorrupt {
                branch: branch.to_string(),
            }),
            WorkspaceState::Empty => self.clone_fresh(branch, workspace).await,
            WorkspaceState::Initialized => self.converge_branch(branch, workspace).await,
        }
    }

    async fn clone_fresh(
        &self,
        branch: &str,
        workspace: PathBuf,
    ) -> Result<BootstrapOutcome, DispatcherError> {
        let repo_url = self.engine.config().repo_url.clone();
        if repo_url.is_empty() {
            return Err(DispatcherError::Bootstrap(
                "no repository URL configured".to_string(),
            ));
        }
        std::fs::create_dir_all(&workspace)
            .map_err(|err| DispatcherError::Bootstrap(format!("create workspace: {err}")))?;

        info!("cloning (branch={branch}, workspace={})", workspace.display());
        let clone = self
            .engine
            .run_git_privileged(
                vec!["clone".to_string(), repo_url, ".".to_string()],
                &workspace,
                true,
            )
            .await;
        if !clone.success() {
            return Err(DispatcherError::Bootstrap(format!(
                "clone failed: {}",
                clone.stderr.trim()
            )));
        }

        if self.engine.current_branch_in(&workspace).await.as_deref() != Some(branch) {
            let args = if self.branch_on_remote(branch, &workspace).await {
                vec!["checkout".to_string(), branch.to_string()]
            } else {
                vec!["checkout".to_string(), "-b".to_string(), branch.to_string()]
            };
            let checkout = self.engine.run_git_privileged(args, &workspace, false).await;
            if !checkout.success() {
                return Err(DispatcherError::Bootstrap(format!(
                    "checkout failed: {}",
                    checkout.stderr.trim()
                )));
            }
        }

        Ok(BootstrapOutcome {
            workspace,
            branch: branch.to_string(),
            action: "cloned",
            cloned: true,
        })
    }

    async fn converge_branch(
        &self,
        branch: &str,
        workspace: PathBuf,
    ) -> Result<BootstrapOutcome, DispatcherError> {
        if self.engine.current_branch_in(&workspace).await.as_deref() == Some(branch) {
            return Ok(BootstrapOutcome {
                workspace,
                branch: branch.to_string(),
                action: "already_on_branch",
                cloned: false,
            });
        }

        // Refresh remote refs so a branch pushed elsewhere is seen.
        // Failure here is not fatal; local state may still suffice.
        self.engine
            .run_git_privileged(
                vec!["fetch".to_string(), "origin".to_string(), "--prune".to_string()],
                &workspace,
                true,
            )
            .await;

        let (args, action) = if self.branch_exists_locally(branch, &workspace).await {
            (vec!["checkout".to_string(), branch.to_string()], "switched_branch")
        } else if self.branch_on_remote(branch, &workspace).await {
            (
                vec![
                    "checkout".to_string(),
                    "-b".to_string(),
                    branch.to_string(),
                    "--track".to_string(),
                    format!("origin/{branch}"),
                ],
                "checked_out",
            )
        } else {
            (
                vec!["checkout".to_string(), "-b".to_string(), branch.to_string()],
                "created",
            )
        };

        let checkout = self.engine.run_git_privileged(args, &workspace, false).await;
        if !checkout.success() {
            return Err(DispatcherError::Bootstrap(format!(
                "checkout failed: {}",
                checkout.stderr.trim()
            )));
        }

        info!("workspace converged (branch={branch}, action={action})");
        Ok(BootstrapOutcome {
            workspace,
            branch: branch.to_string(),
            action,
            cloned: false,
        })
    }

    async fn branch_exists_locally(&self, branch: &str, workspace: &Path) -> bool {
        self.engine
            .run_git_privileged(
                vec![
                    "show-ref".to_string(),
                    "--verify".to_string(),
                    "--quiet".to_string(),
                    format!("refs/heads/{branch}"),
                ],
                workspace,
                false,
            )
            .await
            .success()
    }

    async fn branch_on_remote(&self, branch: &str, workspace: &Path) -> bool {
        self.engine
            .run_git_privileged(
                vec![
                    "ls-remote".to_string(),
                    "--exit-code".to_string(),
                    "--heads".to_string(),
                    "origin".to_string(),
                    branch.to_string(),
                ],
                workspace,
                true,
            )
            .await
            .success()
    }

    /// Delete the branch's workspace directory outright.
    pub fn clean(&self, branch: &str) -> Result<(), DispatcherError> {
        let workspace = self.engine.workspace_dir(branch);
        if !workspace.exists() {
            return Ok(());
        }
        std::fs::remove_dir_all(&workspace)
            .map_err(|err| DispatcherError::Bootstrap(format!("clean workspace: {err}")))
    }

    pub fn workspace_state(&self, branch: &str) -> WorkspaceState {
        inspect(&self.engine.workspace_dir(branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn missing_directory_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(inspect(&root.path().join("nope")), WorkspaceState::Empty);
    }

    #[test]
    fn empty_directory_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(inspect(root.path()), WorkspaceState::Empty);
    }

    #[test]
    fn repository_is_initialized() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join(".git")).unwrap();
        assert_eq!(inspect(root.path()), WorkspaceState::Initialized);
    }

    #[test]
    fn files_without_repository_are_corrupt() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("stray.txt"), "data").unwrap();
        assert_eq!(inspect(root.path()), WorkspaceState::Corrupt);
    }
}
