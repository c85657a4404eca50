//! Wire types shared by the warden dispatcher and its callers.
//!
//! The dispatcher speaks JSON over HTTP to the `git`/`gh` shims running
//! inside sandbox pods. Everything here is plain serde data; the policy
//! logic lives in `warden-dispatcher`.

use serde::Deserialize;
use serde::Serialize;

/// Response header carrying the subprocess (or denial) exit code.
pub const EXIT_CODE_HEADER: &str = "x-warden-exit-code";

/// Response header distinguishing "command ran" from "command was denied".
///
/// The original shim contract distinguished the two only by message
/// content; this header is the out-of-band signal so callers no longer
/// have to sniff stderr.
pub const POLICY_HEADER: &str = "x-warden-policy";

/// Values carried by [`POLICY_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDisposition {
    Executed,
    Denied,
}

impl PolicyDisposition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Denied => "denied",
        }
    }
}

/// A `git`/`gh` invocation forwarded by the sandbox shim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRequest {
    /// Argument vector, excluding the program name.
    pub args: Vec<String>,
    /// Working directory as seen by the sandbox (`/workspace/...`).
    pub cwd: String,
}

/// Outcome of a dispatched command, denial or real execution alike.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterResponse {
    pub status: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapRequest {
    pub branch: String,
}

/// Report of a workspace bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapResponse {
    pub status: String,
    pub workspace: String,
    pub branch: String,
    /// One of `cloned`, `created`, `checked_out`, `already_on_branch`,
    /// `switched_branch`.
    pub action: String,
    pub cloned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodCreateRequest {
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodSummary {
    pub branch: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodListResponse {
    pub pods: Vec<PodSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodStatusResponse {
    pub status: String,
}

/// Error body returned for 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn command_request_round_trips() {
        let req = CommandRequest {
            args: vec!["push".to_string(), "origin".to_string()],
            cwd: "/workspace".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"args":["push","origin"],"cwd":"/workspace"}"#
        );
    }

    #[test]
    fn command_request_rejects_missing_fields() {
        let err = serde_json::from_str::<CommandRequest>(r#"{"args":["status"]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn policy_disposition_values() {
        assert_eq!(PolicyDisposition::Executed.as_str(), "executed");
        assert_eq!(PolicyDisposition::Denied.as_str(), "denied");
    }
}
