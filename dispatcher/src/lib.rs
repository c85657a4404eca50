//! Policy-enforced git/gh execution for sandboxed autonomous agents.
//!
//! Each sandbox pod holds no credentials of its own. Its `git` and `gh`
//! binaries are shims that POST the argument vector to this dispatcher,
//! which classifies the command, checks it against the pod's assigned
//! branch, runs pre-push hooks, and executes the real binary with
//! injected credentials the sandbox never sees.
//!
//! Caller identity is the source address of the pod's connection. This
//! relies on network-level isolation preventing address spoofing between
//! sandboxes; it is a deployment invariant, not something this crate can
//! verify. Registry entries are removed only by explicit deletion, so a
//! pod that dies without being deleted leaves a stale entry behind.

pub mod classify;
pub mod config;
pub mod error;
pub mod exec;
pub mod gh_classify;
pub mod git;
pub mod hooks;
pub mod paths;
pub mod policy;
pub mod registry;
pub mod server;
pub mod workspace;

pub use config::DispatcherConfig;
pub use error::DispatcherError;
pub use exec::CommandRunner;
pub use exec::ExecOutcome;
pub use exec::GithubToken;
pub use exec::Invocation;
pub use exec::ProcessRunner;
pub use git::CommandOutcome;
pub use git::GitEngine;
pub use registry::PodRegistry;
pub use server::AppState;
pub use server::build_router;
pub use workspace::Bootstrapper;
