//! Forward-proxy serving: plain HTTP, blind CONNECT tunnels for bypass
//! hosts, and TLS interception for everything else.
//!
//! Inside an intercepted tunnel the client speaks ordinary HTTP/1.1
//! against a minted certificate, so the same request path handles both
//! plain and intercepted traffic once the URL is reassembled.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::Uri;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ProxyConfig;
use crate::filter::EgressDecision;
use crate::filter::FilterEngine;
use crate::filter::OutboundRequest;
use crate::policy::normalize_host;
use crate::tls::CertAuthority;

/// Connection-level headers never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "proxy-authorization",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub const BLOCK_REASON_HEADER: &str = "x-warden-block-reason";

pub struct ProxyContext {
    pub engine: FilterEngine,
    pub authority: CertAuthority,
    pub client: reqwest::Client,
}

impl ProxyContext {
    pub fn new(
        engine: FilterEngine,
        authority: CertAuthority,
        upstream_timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(upstream_timeout)
            .build()?;
        Ok(Self {
            engine,
            authority,
            client,
        })
    }
}

pub async fn run(config: &ProxyConfig, ctx: Arc<ProxyContext>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!("egress proxy listening on {}", config.bind_addr);
    loop {
        let (stream, peer) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, peer, ctx.clone()));
            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
            {
                debug!("client connection closed (peer={peer}): {err}");
            }
        });
    }
}

/// Top-level per-request entry point.
pub async fn handle<B>(
    req: Request<B>,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    if req.method() == Method::CONNECT {
        return Ok(handle_connect(req, peer, ctx));
    }

    // Absolute-form request URI, per the forward-proxy convention.
    let url = req.uri().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Ok(plain_response(
            StatusCode::BAD_REQUEST,
            "proxy requests must use an absolute URL",
        ));
    }

    // Bypass hosts are forwarded uninspected, same as their tunnels.
    let host = req.uri().host().map(normalize_host).unwrap_or_default();
    if ctx.engine.policy().is_bypassed(&host) {
        info!("plain request bypassed (peer={peer}, host={host})");
        return Ok(forward_unfiltered(req, url, peer, ctx).await);
    }

    Ok(filter_and_forward(req, url, peer, ctx).await)
}

fn handle_connect<B>(
    req: Request<B>,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Response<Full<Bytes>>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: std::fmt::Display,
{
    let Some(authority) = req.uri().authority().cloned() else {
        warn!("CONNECT missing authority (peer={peer})");
        return plain_response(StatusCode::BAD_REQUEST, "CONNECT requires host:port");
    };
    let host = normalize_host(authority.host());
    let port = authority.port_u16().unwrap_or(443);

    if let Some(domain) = ctx.engine.policy().blocked_domain(&host) {
        warn!("CONNECT blocked (peer={peer}, host={host}, reason=blocked_domain, domain={domain})");
        return plain_response(StatusCode::FORBIDDEN, "Blocked: destination is on blocklist");
    }

    if ctx.engine.policy().is_bypassed(&host) {
        info!("CONNECT bypassed (peer={peer}, host={host})");
        let upgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            if let Err(err) = tunnel_blind(upgrade, &host, port).await {
                warn!("tunnel error (host={host}): {err}");
            }
        });
        return Response::new(Full::new(Bytes::new()));
    }

    info!("CONNECT intercepted (peer={peer}, host={host}, port={port})");
    let upgrade = hyper::upgrade::on(req);
    tokio::spawn(async move {
        if let Err(err) = intercept_tunnel(upgrade, host.clone(), port, peer, ctx).await {
            warn!("interception error (host={host}): {err}");
        }
    });
    Response::new(Full::new(Bytes::new()))
}

async fn tunnel_blind(
    upgrade: hyper::upgrade::OnUpgrade,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let upgraded = upgrade.await?;
    let mut upstream = TcpStream::connect((host, port)).await?;
    let mut client = TokioIo::new(upgraded);
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

async fn intercept_tunnel(
    upgrade: hyper::upgrade::OnUpgrade,
    host: String,
    port: u16,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> anyhow::Result<()> {
    let upgraded = upgrade.await?;
    let tls_config = ctx.authority.server_config(&host)?;
    let acceptor = TlsAcceptor::from(tls_config);
    let tls_stream = acceptor.accept(TokioIo::new(upgraded)).await?;

    let service = service_fn(move |inner: Request<hyper::body::Incoming>| {
        let ctx = ctx.clone();
        let host = host.clone();
        async move {
            let path_and_query = inner
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            let url = if port == 443 {
                format!("https://{host}{path_and_query}")
            } else {
                format!("https://{host}:{port}{path_and_query}")
            };
            Ok::<_, Infallible>(filter_and_forward(inner, url, peer, ctx).await)
        }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(tls_stream), service)
        .await?;
    Ok(())
}

async fn forward_unfiltered<B>(
    req: Request<B>,
    url: String,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("failed to read request body (peer={peer}): {err}");
            return plain_response(StatusCode::BAD_REQUEST, "could not read request body");
        }
    };
    forward_upstream(&ctx, parts.method, &url, &parts.headers, body_bytes)
        .await
        .unwrap_or_else(|err| {
            warn!("upstream request failed (url={url}): {err}");
            plain_response(StatusCode::BAD_GATEWAY, "upstream request failed")
        })
}

/// Inspect the request against the filter engine, then forward it
/// upstream or refuse it with a plaintext 403.
async fn filter_and_forward<B>(
    req: Request<B>,
    url: String,
    peer: SocketAddr,
    ctx: Arc<ProxyContext>,
) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("failed to read request body (peer={peer}): {err}");
            return plain_response(StatusCode::BAD_REQUEST, "could not read request body");
        }
    };

    let Ok(uri) = url.parse::<Uri>() else {
        return plain_response(StatusCode::BAD_REQUEST, "invalid request URL");
    };
    let host = uri.host().unwrap_or_default().to_string();
    let body_text = String::from_utf8_lossy(&body_bytes);
    let header_values: Vec<&str> = parts
        .headers
        .values()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let outbound = OutboundRequest {
        host: &host,
        method: parts.method.as_str(),
        path: uri.path(),
        query: uri.query().unwrap_or(""),
        header_values,
        body: &body_text,
    };
    if let EgressDecision::Block { reason, detail } = ctx.engine.evaluate(&outbound).await {
        debug!("blocked detail (host={host}, detail={detail})");
        let mut response = plain_response(StatusCode::FORBIDDEN, reason.client_message());
        if let Ok(value) = http::HeaderValue::from_str(reason.as_str()) {
            response.headers_mut().insert(BLOCK_REASON_HEADER, value);
        }
        return response;
    }

    forward_upstream(&ctx, parts.method, &url, &parts.headers, body_bytes)
        .await
        .unwrap_or_else(|err| {
            warn!("upstream request failed (host={host}): {err}");
            plain_response(StatusCode::BAD_GATEWAY, "upstream request failed")
        })
}

async fn forward_upstream(
    ctx: &ProxyContext,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let mut outbound_headers = HeaderMap::new();
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) || name.as_str() == "host" {
            continue;
        }
        outbound_headers.append(name, value.clone());
    }

    let upstream = ctx
        .client
        .request(method, url)
        .headers(outbound_headers)
        .body(body.to_vec())
        .send()
        .await?;

    let status = upstream.status();
    let mut response = Response::builder().status(status);
    if let Some(response_headers) = response.headers_mut() {
        for (name, value) in upstream.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) || name.as_str() == "content-length" {
                continue;
            }
            response_headers.append(name, value.clone());
        }
    }
    let body = upstream.bytes().await?;
    Ok(response.body(Full::new(body))?)
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{message}\n"))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use crate::filter::FilterEngine;
    use crate::policy::EgressPolicy;
    use crate::scanner::LocalRules;

    fn ctx_with(config: ProxyConfig, upstream_timeout: std::time::Duration) -> Arc<ProxyContext> {
        let engine = FilterEngine::new(
            EgressPolicy::new(&config).unwrap(),
            LocalRules::new().unwrap(),
            None,
            false,
        );
        let authority = CertAuthority::generate().unwrap();
        Arc::new(ProxyContext::new(engine, authority, upstream_timeout).unwrap())
    }

    fn ctx() -> Arc<ProxyContext> {
        ctx_with(ProxyConfig::default(), std::time::Duration::from_secs(30))
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 5], 40000))
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn forwards_clean_plain_requests() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&upstream)
            .await;

        let request = Request::builder()
            .method("GET")
            .uri(format!("{}/data", upstream.uri()))
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, peer(), ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "payload");
    }

    #[tokio::test]
    async fn blocks_secret_body_before_upstream() {
        // No upstream server exists; a forward attempt would 502.
        let body = format!("token=ghp_{}", "a".repeat(36));
        let request = Request::builder()
            .method("POST")
            .uri("http://example.com/upload")
            .body(Full::new(Bytes::from(body)))
            .unwrap();
        let response = handle(request, peer(), ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[BLOCK_REASON_HEADER], "secret_in_body");
        assert!(body_string(response).await.starts_with("Blocked:"));
    }

    #[tokio::test]
    async fn blocks_blocklisted_domain() {
        let request = Request::builder()
            .method("GET")
            .uri("http://pastebin.com/raw/abc")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, peer(), ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[BLOCK_REASON_HEADER], "blocked_domain");
    }

    #[tokio::test]
    async fn rejects_origin_form_requests() {
        let request = Request::builder()
            .method("GET")
            .uri("/not-absolute")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, peer(), ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bypass_host_plain_request_skips_filtering() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
            .mount(&upstream)
            .await;

        let mut config = ProxyConfig::default();
        config.bypass_hosts.push("127.0.0.1".to_string());
        let ctx = ctx_with(config, std::time::Duration::from_secs(30));

        // A body the filter would otherwise block.
        let body = format!("token=ghp_{}", "a".repeat(36));
        let request = Request::builder()
            .method("POST")
            .uri(format!("{}/upload", upstream.uri()))
            .body(Full::new(Bytes::from(body)))
            .unwrap();
        let response = handle(request, peer(), ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "stored");
    }

    #[tokio::test]
    async fn slow_upstream_times_out_as_bad_gateway() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)),
            )
            .mount(&upstream)
            .await;

        let ctx = ctx_with(ProxyConfig::default(), std::time::Duration::from_millis(200));
        let request = Request::builder()
            .method("GET")
            .uri(format!("{}/slow", upstream.uri()))
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, peer(), ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn blocked_github_api_call_never_reaches_upstream() {
        let request = Request::builder()
            .method("DELETE")
            .uri("http://api.github.com/repos/acme/widget")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handle(request, peer(), ctx()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()[BLOCK_REASON_HEADER],
            "blocked_api_pattern"
        );
    }
}
