//! Proxy configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8888";
const DEFAULT_SCANNER_URL: &str = "http://llm-guard:8000";

/// Hosts tunneled blind, never intercepted. The agent's own model API
/// carries credentials that must not transit a MITM hop.
const DEFAULT_BYPASS_HOSTS: &[&str] = &["api.anthropic.com"];

/// Paste sites and anonymous file drops. Upload endpoints change too
/// often to enumerate, so these are blocked at the domain level.
const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "pastebin.com",
    "paste.ee",
    "hastebin.com",
    "dpaste.org",
    "file.io",
    "transfer.sh",
    "0x0.st",
    "ix.io",
    "sprunge.us",
    "termbin.com",
];

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    pub bypass_hosts: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub scanner_url: String,
    /// Bearer token for the scanner service; scanning is skipped (local
    /// rules still apply) when unset.
    pub scanner_token: Option<String>,
    pub scanner_timeout: Duration,
    /// When true, a scanner outage lets traffic through on local rules
    /// alone. Off by default: an unreachable scanner blocks.
    pub scanner_fail_open: bool,
    /// Whole-request deadline for forwarded upstream calls.
    pub upstream_timeout: Duration,
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
}

impl ProxyConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_or("WARDEN_PROXY_BIND", DEFAULT_BIND_ADDR)
            .parse::<SocketAddr>()
            .map_err(|err| anyhow::anyhow!("invalid WARDEN_PROXY_BIND: {err}"))?;

        let scanner_timeout = match std::env::var("SCANNER_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|err| anyhow::anyhow!("invalid SCANNER_TIMEOUT_SECS: {err}"))?,
            ),
            Err(_) => Duration::from_secs(10),
        };

        let upstream_timeout = match std::env::var("UPSTREAM_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse::<u64>()
                    .map_err(|err| anyhow::anyhow!("invalid UPSTREAM_TIMEOUT_SECS: {err}"))?,
            ),
            Err(_) => Duration::from_secs(120),
        };

        Ok(Self {
            bind_addr,
            bypass_hosts: env_list("PROXY_BYPASS", DEFAULT_BYPASS_HOSTS),
            blocked_domains: env_list("BLOCKED_DOMAINS", DEFAULT_BLOCKED_DOMAINS),
            scanner_url: env_or("SCANNER_URL", DEFAULT_SCANNER_URL),
            scanner_token: std::env::var("SCANNER_TOKEN")
                .ok()
                .filter(|token| !token.is_empty()),
            scanner_timeout,
            scanner_fail_open: env_or("SCANNER_FAIL_OPEN", "false") == "true",
            upstream_timeout,
            ca_cert_path: PathBuf::from(env_or("WARDEN_CA_CERT", "/etc/warden/ca.crt")),
            ca_key_path: PathBuf::from(env_or("WARDEN_CA_KEY", "/etc/warden/ca.key")),
        })
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            bypass_hosts: to_strings(DEFAULT_BYPASS_HOSTS),
            blocked_domains: to_strings(DEFAULT_BLOCKED_DOMAINS),
            scanner_url: DEFAULT_SCANNER_URL.to_string(),
            scanner_token: None,
            scanner_timeout: Duration::from_secs(10),
            scanner_fail_open: false,
            upstream_timeout: Duration::from_secs(120),
            ca_cert_path: PathBuf::from("/etc/warden/ca.crt"),
            ca_key_path: PathBuf::from("/etc/warden/ca.key"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => to_strings(default),
    }
}

fn to_strings(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|entry| (*entry).to_string()).collect()
}
