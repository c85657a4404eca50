//! HTTP surface of the dispatcher.
//!
//! Handlers resolve caller identity from the connection's source
//! address, then delegate to the registry, engine, or bootstrapper.
//! Command results always come back `200 OK`; the subprocess exit code
//! travels in the body and in a response header, and a second header
//! distinguishes policy denials from commands that really ran.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::ConnectInfo;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use tracing::info;

use warden_protocol::BootstrapRequest;
use warden_protocol::BootstrapResponse;
use warden_protocol::CommandRequest;
use warden_protocol::CommandResponse;
use warden_protocol::EXIT_CODE_HEADER;
use warden_protocol::POLICY_HEADER;
use warden_protocol::PodCreateRequest;
use warden_protocol::PodListResponse;
use warden_protocol::PodStatusResponse;
use warden_protocol::PodSummary;
use warden_protocol::PolicyDisposition;
use warden_protocol::RegisterRequest;
use warden_protocol::RegisterResponse;

use crate::config::DispatcherConfig;
use crate::error::DispatcherError;
use crate::git::CommandOutcome;
use crate::git::GitEngine;
use crate::registry::PodRegistry;
use crate::registry::RegistryError;
use crate::workspace::Bootstrapper;
use crate::workspace::WorkspaceState;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PodRegistry>,
    pub engine: Arc<GitEngine>,
    pub bootstrapper: Arc<Bootstrapper>,
    pub config: Arc<DispatcherConfig>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register).delete(deregister))
        .route("/registry", get(registry_snapshot))
        .route("/bootstrap", post(bootstrap))
        .route("/git", post(run_git))
        .route("/gh", post(run_gh))
        .route("/pods", post(create_pod).get(list_pods))
        .route("/pods/{branch}", axum::routing::delete(delete_pod))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn caller_branch(state: &AppState, ip: IpAddr) -> Result<String, DispatcherError> {
    state
        .registry
        .branch_for(ip)
        .ok_or(DispatcherError::UnregisteredPod)
}

async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, DispatcherError> {
    if request.branch.is_empty() {
        return Err(DispatcherError::InvalidRequest(
            "branch must not be empty".to_string(),
        ));
    }
    state
        .registry
        .register(addr.ip(), &request.branch)
        .map_err(|err| match err {
            RegistryError::AlreadyRegistered { existing, .. } => {
                DispatcherError::AlreadyRegistered { existing }
            }
        })?;
    info!("pod registered (ip={}, branch={})", addr.ip(), request.branch);
    Ok(Json(RegisterResponse {
        status: "registered".to_string(),
        branch: request.branch,
    }))
}

async fn deregister(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Json<RegisterResponse> {
    let branch = state.registry.deregister(addr.ip()).unwrap_or_default();
    info!("pod deregistered (ip={}, branch={branch})", addr.ip());
    Json(RegisterResponse {
        status: "deregistered".to_string(),
        branch,
    })
}

async fn registry_snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    let entries: serde_json::Map<String, serde_json::Value> = state
        .registry
        .entries()
        .into_iter()
        .map(|(ip, branch)| (ip.to_string(), serde_json::Value::String(branch)))
        .collect();
    Json(serde_json::Value::Object(entries))
}

async fn bootstrap(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<BootstrapRequest>,
) -> Result<Json<BootstrapResponse>, DispatcherError> {
    let assigned = caller_branch(&state, addr.ip())?;
    if request.branch != assigned {
        return Err(DispatcherError::InvalidRequest(format!(
            "pod is registered to branch '{assigned}', not '{}'",
            request.branch
        )));
    }
    let outcome = state.bootstrapper.bootstrap(&assigned).await?;
    Ok(Json(BootstrapResponse {
        status: "ok".to_string(),
        workspace: outcome.workspace.display().to_string(),
        branch: outcome.branch,
        action: outcome.action.to_string(),
        cloned: outcome.cloned,
    }))
}

async fn run_git(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<CommandRequest>,
) -> Result<Response, DispatcherError> {
    let branch = caller_branch(&state, addr.ip())?;
    let outcome = state
        .engine
        .handle_git(&branch, request.args, &request.cwd)
        .await;
    command_reply(outcome)
}

async fn run_gh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<CommandRequest>,
) -> Result<Response, DispatcherError> {
    let branch = caller_branch(&state, addr.ip())?;
    let outcome = state
        .engine
        .handle_gh(&branch, request.args, &request.cwd)
        .await;
    command_reply(outcome)
}

/// Shared shape for /git and /gh replies: body plus the out-of-band
/// exit-code and disposition headers. A timed-out subprocess is an
/// upstream failure, not a command result.
fn command_reply(outcome: CommandOutcome) -> Result<Response, DispatcherError> {
    let (disposition, body) = match outcome {
        CommandOutcome::Executed(out) if out.timed_out => {
            return Err(DispatcherError::CommandTimeout);
        }
        CommandOutcome::Executed(out) => (
            PolicyDisposition::Executed,
            CommandResponse {
                stdout: out.stdout,
                stderr: out.stderr,
                exit_code: out.exit_code,
            },
        ),
        CommandOutcome::Denied { message } => (
            PolicyDisposition::Denied,
            CommandResponse {
                stdout: String::new(),
                stderr: message,
                exit_code: 1,
            },
        ),
    };

    let exit_code = body.exit_code;
    let mut response = Json(body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&exit_code.to_string()) {
        headers.insert(EXIT_CODE_HEADER, value);
    }
    headers.insert(
        POLICY_HEADER,
        HeaderValue::from_static(disposition.as_str()),
    );
    Ok(response)
}

async fn create_pod(
    State(state): State<AppState>,
    Json(request): Json<PodCreateRequest>,
) -> Result<Json<BootstrapResponse>, DispatcherError> {
    if request.branch.is_empty() {
        return Err(DispatcherError::InvalidRequest(
            "branch must not be empty".to_string(),
        ));
    }
    let outcome = state.bootstrapper.bootstrap(&request.branch).await?;
    Ok(Json(BootstrapResponse {
        status: "ok".to_string(),
        workspace: outcome.workspace.display().to_string(),
        branch: outcome.branch,
        action: outcome.action.to_string(),
        cloned: outcome.cloned,
    }))
}

async fn list_pods(State(state): State<AppState>) -> Json<PodListResponse> {
    // Registered branches plus workspace directories; a pod registered
    // before its first bootstrap has no directory yet.
    let mut branches: std::collections::BTreeSet<String> = state
        .registry
        .entries()
        .into_iter()
        .map(|(_, branch)| branch)
        .collect();
    if let Ok(entries) = std::fs::read_dir(&state.config.workspace_root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                branches.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }

    let pods = branches
        .into_iter()
        .map(|branch| {
            let status = match state.bootstrapper.workspace_state(&branch) {
                WorkspaceState::Initialized => "initialized",
                WorkspaceState::Corrupt => "corrupt",
                WorkspaceState::Empty => "empty",
            };
            PodSummary {
                branch,
                status: status.to_string(),
            }
        })
        .collect();
    Json(PodListResponse { pods })
}

#[derive(Deserialize)]
struct DeletePodQuery {
    #[serde(default)]
    clean: bool,
}

async fn delete_pod(
    State(state): State<AppState>,
    Path(branch): Path<String>,
    Query(query): Query<DeletePodQuery>,
) -> Result<Json<PodStatusResponse>, DispatcherError> {
    let removed = state.registry.remove_branch(&branch);
    if query.clean {
        state.bootstrapper.clean(&branch)?;
    }
    info!(
        "pod deleted (branch={branch}, registrations_removed={removed}, clean={})",
        query.clean
    );
    Ok(Json(PodStatusResponse {
        status: "deleted".to_string(),
    }))
}
