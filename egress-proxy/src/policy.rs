//! Host and GitHub API policy.
//!
//! Domain blocking is defense in depth; the dispatcher is the primary
//! control. These checks are over-inclusive by design: a paste site's
//! apex and every subdomain are treated the same.

use anyhow::Context;
use anyhow::Result;
use regex::Regex;

use crate::config::ProxyConfig;

/// Destructive or credential-bearing GitHub API endpoints agents may
/// not reach, even with a token that technically permits them.
const GITHUB_API_BLOCKED: &[(&str, &str)] = &[
    // Agents propose merges; a human performs them.
    ("PUT", r"^/repos/[^/]+/[^/]+/pulls/\d+/merge"),
    ("DELETE", r"^/repos/.*"),
    ("DELETE", r"^/orgs/.*"),
    ("DELETE", r"^/user/.*"),
    ("GET", r"^/repos/[^/]+/[^/]+/actions/secrets.*"),
    ("GET", r"^/orgs/[^/]+/actions/secrets.*"),
    ("PATCH", r"^/repos/[^/]+/[^/]+$"),
    ("PUT", r"^/repos/[^/]+/[^/]+/collaborators.*"),
    ("POST", r"^/repos/[^/]+/[^/]+/hooks"),
    ("PATCH", r"^/repos/[^/]+/[^/]+/hooks/\d+"),
    ("PUT", r"^/repos/[^/]+/[^/]+/branches/[^/]+/protection"),
    ("DELETE", r"^/repos/[^/]+/[^/]+/branches/[^/]+/protection"),
];

const GITHUB_API_HOSTS: &[&str] = &["api.github.com", "github.com"];

pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with('[')
        && let Some(end) = host.find(']')
    {
        return normalize_dns_host(&host[1..end]);
    }

    // Strip `:port` when there is exactly one `:`, without mangling
    // unbracketed IPv6 literals.
    if host.bytes().filter(|b| *b == b':').count() == 1 {
        let host = host.split(':').next().unwrap_or_default();
        return normalize_dns_host(host);
    }

    normalize_dns_host(host)
}

fn normalize_dns_host(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    host.trim_end_matches('.').to_string()
}

/// Apex-or-subdomain match: `pastebin.com` covers `pastebin.com` and
/// `cdn.pastebin.com`, never `notpastebin.com`.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

pub struct EgressPolicy {
    bypass_hosts: Vec<String>,
    blocked_domains: Vec<String>,
    api_rules: Vec<(String, Regex)>,
}

impl EgressPolicy {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let mut api_rules = Vec::with_capacity(GITHUB_API_BLOCKED.len());
        for (method, pattern) in GITHUB_API_BLOCKED {
            let regex = Regex::new(pattern)
                .with_context(|| format!("invalid API block pattern {pattern}"))?;
            api_rules.push(((*method).to_string(), regex));
        }
        Ok(Self {
            bypass_hosts: config.bypass_hosts.iter().map(|h| normalize_host(h)).collect(),
            blocked_domains: config
                .blocked_domains
                .iter()
                .map(|h| normalize_host(h))
                .collect(),
            api_rules,
        })
    }

    /// Bypass hosts are tunneled blind; no interception at all.
    pub fn is_bypassed(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.bypass_hosts
            .iter()
            .any(|bypass| host_matches(&host, bypass))
    }

    /// The blocklist entry covering `host`, if any.
    pub fn blocked_domain(&self, host: &str) -> Option<&str> {
        let host = normalize_host(host);
        self.blocked_domains
            .iter()
            .find(|domain| host_matches(&host, domain))
            .map(String::as_str)
    }

    /// Description of the violated rule for a blocked GitHub API call.
    pub fn api_violation(&self, host: &str, method: &str, path: &str) -> Option<String> {
        let host = normalize_host(host);
        if !GITHUB_API_HOSTS.contains(&host.as_str()) {
            return None;
        }
        self.api_rules
            .iter()
            .find(|(blocked_method, pattern)| blocked_method == method && pattern.is_match(path))
            .map(|(blocked_method, pattern)| format!("{blocked_method} {}", pattern.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn policy() -> EgressPolicy {
        EgressPolicy::new(&ProxyConfig::default()).unwrap()
    }

    #[test]
    fn normalizes_case_port_and_trailing_dot() {
        assert_eq!(normalize_host("Pastebin.COM."), "pastebin.com");
        assert_eq!(normalize_host("pastebin.com:443"), "pastebin.com");
        assert_eq!(normalize_host("[::1]:8443"), "::1");
    }

    #[test]
    fn blocklist_covers_subdomains_not_lookalikes() {
        let policy = policy();
        assert_eq!(policy.blocked_domain("pastebin.com"), Some("pastebin.com"));
        assert_eq!(
            policy.blocked_domain("cdn.pastebin.com"),
            Some("pastebin.com")
        );
        assert_eq!(policy.blocked_domain("notpastebin.com"), None);
        assert_eq!(policy.blocked_domain("example.com"), None);
    }

    #[test]
    fn bypass_host_matches_with_port() {
        let policy = policy();
        assert!(policy.is_bypassed("api.anthropic.com"));
        assert!(policy.is_bypassed("api.anthropic.com:443"));
        assert!(!policy.is_bypassed("api.github.com"));
    }

    #[test]
    fn pr_merge_is_blocked_on_api_host_only() {
        let policy = policy();
        assert!(
            policy
                .api_violation("api.github.com", "PUT", "/repos/acme/widget/pulls/12/merge")
                .is_some()
        );
        assert!(
            policy
                .api_violation("gitlab.com", "PUT", "/repos/acme/widget/pulls/12/merge")
                .is_none()
        );
    }

    #[test]
    fn deletes_and_secret_reads_are_blocked() {
        let policy = policy();
        assert!(
            policy
                .api_violation("api.github.com", "DELETE", "/repos/acme/widget")
                .is_some()
        );
        assert!(
            policy
                .api_violation("api.github.com", "GET", "/repos/acme/widget/actions/secrets")
                .is_some()
        );
        assert!(
            policy
                .api_violation("api.github.com", "GET", "/repos/acme/widget/pulls")
                .is_none()
        );
        assert!(
            policy
                .api_violation("api.github.com", "POST", "/repos/acme/widget/issues")
                .is_none()
        );
    }

    #[test]
    fn repo_settings_patch_requires_exact_path() {
        let policy = policy();
        assert!(
            policy
                .api_violation("api.github.com", "PATCH", "/repos/acme/widget")
                .is_some()
        );
        assert!(
            policy
                .api_violation("api.github.com", "PATCH", "/repos/acme/widget/issues/3")
                .is_none()
        );
    }
}
