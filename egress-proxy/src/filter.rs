//! Per-request egress decision.
//!
//! Checks run in a fixed order and the first BLOCK wins: domain
//! blocklist, GitHub API rules, local credential patterns per location,
//! then the remote scanner over each location (path, query, body,
//! header values). Bypass hosts never reach this engine; the proxy
//! tunnels them without interception.

use std::sync::Arc;

use tracing::info;
use tracing::warn;

use crate::policy::EgressPolicy;
use crate::scanner::LocalRules;
use crate::scanner::MIN_SCAN_LEN;
use crate::scanner::SecretScanner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    SecretInBody,
    SecretInHeader,
    SecretInUrlPath,
    SecretInQuery,
    BlockedDomain,
    BlockedApiPattern,
    ScannerUnavailable,
}

impl BlockReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SecretInBody => "secret_in_body",
            Self::SecretInHeader => "secret_in_header",
            Self::SecretInUrlPath => "secret_in_url_path",
            Self::SecretInQuery => "secret_in_query",
            Self::BlockedDomain => "blocked_domain",
            Self::BlockedApiPattern => "blocked_api_pattern",
            Self::ScannerUnavailable => "scanner_unavailable",
        }
    }

    /// Plaintext body of the 403 returned to the client.
    pub const fn client_message(self) -> &'static str {
        match self {
            Self::SecretInBody => "Blocked: request body contains potential secrets",
            Self::SecretInHeader => "Blocked: request header contains potential secrets",
            Self::SecretInUrlPath => "Blocked: URL contains potential secrets",
            Self::SecretInQuery => "Blocked: query string contains potential secrets",
            Self::BlockedDomain => "Blocked: destination is on blocklist",
            Self::BlockedApiPattern => "Blocked: this API endpoint is not permitted",
            Self::ScannerUnavailable => "Blocked: secret scanner unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressDecision {
    Allow,
    Block {
        reason: BlockReason,
        /// Rule or scanner names, never matched text.
        detail: String,
    },
}

impl EgressDecision {
    fn block(reason: BlockReason, detail: impl Into<String>) -> Self {
        Self::Block {
            reason,
            detail: detail.into(),
        }
    }
}

/// The parts of an intercepted request the filter inspects.
pub struct OutboundRequest<'a> {
    pub host: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub query: &'a str,
    /// Header values only; names carry no secrets.
    pub header_values: Vec<&'a str>,
    pub body: &'a str,
}

pub struct FilterEngine {
    policy: EgressPolicy,
    rules: LocalRules,
    scanner: Option<Arc<dyn SecretScanner>>,
    fail_open: bool,
}

impl FilterEngine {
    pub fn new(
        policy: EgressPolicy,
        rules: LocalRules,
        scanner: Option<Arc<dyn SecretScanner>>,
        fail_open: bool,
    ) -> Self {
        Self {
            policy,
            rules,
            scanner,
            fail_open,
        }
    }

    pub fn policy(&self) -> &EgressPolicy {
        &self.policy
    }

    pub async fn evaluate(&self, request: &OutboundRequest<'_>) -> EgressDecision {
        if let Some(domain) = self.policy.blocked_domain(request.host) {
            warn!(
                "request blocked (host={}, method={}, reason=blocked_domain, domain={domain})",
                request.host, request.method
            );
            return EgressDecision::block(BlockReason::BlockedDomain, domain);
        }

        if let Some(rule) = self
            .policy
            .api_violation(request.host, request.method, request.path)
        {
            warn!(
                "request blocked (host={}, method={}, reason=blocked_api_pattern, rule={rule})",
                request.host, request.method
            );
            return EgressDecision::block(BlockReason::BlockedApiPattern, rule);
        }

        let locations: [(&str, BlockReason); 3] = [
            (request.path, BlockReason::SecretInUrlPath),
            (request.query, BlockReason::SecretInQuery),
            (request.body, BlockReason::SecretInBody),
        ];
        for (text, reason) in locations {
            let findings = self.rules.findings(text);
            if !findings.is_empty() {
                warn!(
                    "request blocked (host={}, reason={}, patterns={findings:?})",
                    request.host,
                    reason.as_str()
                );
                return EgressDecision::block(reason, findings.join(","));
            }
        }
        for value in &request.header_values {
            let findings = self.rules.findings(value);
            if !findings.is_empty() {
                warn!(
                    "request blocked (host={}, reason=secret_in_header, patterns={findings:?})",
                    request.host
                );
                return EgressDecision::block(BlockReason::SecretInHeader, findings.join(","));
            }
        }

        if let Some(scanner) = &self.scanner {
            let mut targets: Vec<(&str, BlockReason)> = vec![
                (request.path, BlockReason::SecretInUrlPath),
                (request.query, BlockReason::SecretInQuery),
                (request.body, BlockReason::SecretInBody),
            ];
            for value in &request.header_values {
                targets.push((*value, BlockReason::SecretInHeader));
            }
            for (text, reason) in targets {
                if text.len() < MIN_SCAN_LEN {
                    continue;
                }
                match scanner.scan(text).await {
                    Ok(verdict) if verdict.clean() => {}
                    Ok(verdict) => {
                        warn!(
                            "request blocked (host={}, reason={}, scanners={:?})",
                            request.host,
                            reason.as_str(),
                            verdict.flagged
                        );
                        return EgressDecision::block(reason, verdict.flagged.join(","));
                    }
                    Err(err) if self.fail_open => {
                        warn!("scanner unavailable, allowing request (fail-open set): {err}");
                        break;
                    }
                    Err(err) => {
                        warn!(
                            "request blocked (host={}, reason=scanner_unavailable): {err}",
                            request.host
                        );
                        return EgressDecision::block(
                            BlockReason::ScannerUnavailable,
                            err.to_string(),
                        );
                    }
                }
            }
        }

        info!("request allowed (host={}, method={})", request.host, request.method);
        EgressDecision::Allow
    }
}
