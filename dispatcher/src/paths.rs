//! Path translation between the sandbox and dispatcher filesystems.
//!
//! A sandbox sees its clone at `/workspace`; the dispatcher keeps the
//! same tree at `<workspace_root>/<branch>`. This is a mount-point
//! substitution, not a security check.

use std::path::Path;
use std::path::PathBuf;

const AGENT_WORKSPACE: &str = "/workspace";

pub fn workspace_dir(workspace_root: &Path, branch: &str) -> PathBuf {
    workspace_root.join(branch)
}

/// Translate the caller-reported cwd into the dispatcher's view.
/// Paths outside `/workspace` pass through untouched.
pub fn translate_cwd(workspace_root: &Path, agent_cwd: &str, branch: &str) -> PathBuf {
    if agent_cwd == AGENT_WORKSPACE {
        return workspace_dir(workspace_root, branch);
    }
    if let Some(rest) = agent_cwd.strip_prefix("/workspace/") {
        return workspace_dir(workspace_root, branch).join(rest);
    }
    PathBuf::from(agent_cwd)
}
