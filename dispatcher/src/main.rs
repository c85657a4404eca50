use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use warden_dispatcher::AppState;
use warden_dispatcher::Bootstrapper;
use warden_dispatcher::DispatcherConfig;
use warden_dispatcher::GitEngine;
use warden_dispatcher::PodRegistry;
use warden_dispatcher::ProcessRunner;
use warden_dispatcher::build_router;

#[derive(Parser, Debug)]
#[command(name = "warden-dispatcher", about = "Policy-enforced git/gh dispatcher")]
struct Args {
    /// Address to listen on, overriding WARDEN_BIND_ADDR.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let (mut config, token) = DispatcherConfig::from_env()?;
    if let Some(listen) = args.listen {
        config.bind_addr = listen;
    }
    if token.is_none() {
        tracing::warn!("GITHUB_PAT is not set; remote operations will be unauthenticated");
    }

    let config = Arc::new(config);
    let engine = Arc::new(GitEngine::new(
        Arc::new(ProcessRunner),
        config.clone(),
        token,
    ));
    let state = AppState {
        registry: Arc::new(PodRegistry::new()),
        engine: engine.clone(),
        bootstrapper: Arc::new(Bootstrapper::new(engine)),
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("dispatcher listening on {}", config.bind_addr);
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
