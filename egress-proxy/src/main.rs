use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use warden_egress_proxy::CertAuthority;
use warden_egress_proxy::EgressPolicy;
use warden_egress_proxy::FilterEngine;
use warden_egress_proxy::LocalRules;
use warden_egress_proxy::ProxyConfig;
use warden_egress_proxy::RemoteScanner;
use warden_egress_proxy::SecretScanner;
use warden_egress_proxy::proxy;
use warden_egress_proxy::proxy::ProxyContext;

#[derive(Parser, Debug)]
#[command(name = "warden-egress-proxy", about = "Egress-filtering MITM proxy")]
struct Args {
    /// Address to listen on, overriding WARDEN_PROXY_BIND.
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
    let mut config = ProxyConfig::from_env()?;
    if let Some(listen) = args.listen {
        config.bind_addr = listen;
    }
    if config.scanner_fail_open {
        tracing::warn!("SCANNER_FAIL_OPEN is set; scanner outages will not block traffic");
    }

    let scanner: Option<Arc<dyn SecretScanner>> =
        Some(Arc::new(RemoteScanner::new(&config)?));
    let engine = FilterEngine::new(
        EgressPolicy::new(&config)?,
        LocalRules::new()?,
        scanner,
        config.scanner_fail_open,
    );
    let authority = CertAuthority::load_or_generate(&config.ca_cert_path, &config.ca_key_path)?;
    let ctx = Arc::new(ProxyContext::new(engine, authority, config.upstream_timeout)?);

    proxy::run(&config, ctx).await
}
