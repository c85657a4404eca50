//! Pre-push hook execution.
//!
//! Hooks run sequentially through `sh -c` inside the workspace before the
//! real push is attempted. The first failing hook aborts the push.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing::warn;

use crate::exec::CommandRunner;
use crate::exec::ExecOutcome;
use crate::exec::Invocation;

pub struct HookFailure {
    pub command: String,
    pub outcome: ExecOutcome,
}

/// Runs each hook in order; returns the first failure, if any.
pub async fn run_pre_push_hooks(
    runner: &Arc<dyn CommandRunner>,
    hooks: &[String],
    workspace: &Path,
    timeout: Duration,
) -> Option<HookFailure> {
    for hook in hooks {
        info!("running pre-push hook (command={hook})");
        let invocation = Invocation::new("sh", vec!["-c".to_string(), hook.clone()], workspace)
            .timeout(timeout);
        let outcome = runner.run(invocation).await;
        if outcome.exit_code != 0 {
            warn!(
                "pre-push hook failed (command={hook}, exit_code={})",
                outcome.exit_code
            );
            return Some(HookFailure {
                command: hook.clone(),
                outcome,
            });
        }
    }
    None
}

impl HookFailure {
    /// Combined agent-facing message explaining why the push was refused.
    pub fn message(&self) -> String {
        let mut message = format!(
            "warden: pre-push hook failed ({}), push aborted.\n",
            self.command
        );
        if !self.outcome.stdout.is_empty() {
            message.push_str(&self.outcome.stdout);
            if !self.outcome.stdout.ends_with('\n') {
                message.push('\n');
            }
        }
        if !self.outcome.stderr.is_empty() {
            message.push_str(&self.outcome.stderr);
            if !self.outcome.stderr.ends_with('\n') {
                message.push('\n');
            }
        }
        message
    }
}
