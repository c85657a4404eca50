use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use warden_protocol::ErrorResponse;

/// Errors surfaced to HTTP clients. Denials are not errors; they travel
/// as successful responses carrying a nonzero exit code.
#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("pod is not registered; POST /register first")]
    UnregisteredPod,

    #[error("pod is already registered to branch '{existing}'")]
    AlreadyRegistered { existing: String },

    #[error("workspace for branch '{branch}' exists but is not a git repository")]
    WorkspaceCorrupt { branch: String },

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("command timed out; retry the operation")]
    CommandTimeout,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatcherError {
    fn status(&self) -> StatusCode {
        match self {
            Self::UnregisteredPod => StatusCode::FORBIDDEN,
            Self::AlreadyRegistered { .. } | Self::WorkspaceCorrupt { .. } => {
                StatusCode::CONFLICT
            }
            Self::Bootstrap(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::CommandTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DispatcherError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn status_mapping() {
        assert_eq!(
            DispatcherError::UnregisteredPod.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DispatcherError::AlreadyRegistered {
                existing: "feature".to_string()
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DispatcherError::WorkspaceCorrupt {
                branch: "feature".to_string()
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DispatcherError::Bootstrap("clone failed".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
