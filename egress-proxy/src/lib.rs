//! Egress-filtering MITM proxy for sandboxed agents.
//!
//! Every outbound HTTP(S) request from a sandbox passes through here.
//! CONNECT tunnels to non-bypass hosts are intercepted with a locally
//! minted certificate so request bodies can be inspected; anything that
//! looks like credential exfiltration, a paste-site upload, or a
//! destructive GitHub API call is refused with a `403` before it leaves
//! the cluster.

pub mod config;
pub mod filter;
pub mod policy;
pub mod proxy;
pub mod scanner;
pub mod tls;

pub use config::ProxyConfig;
pub use filter::BlockReason;
pub use filter::EgressDecision;
pub use filter::FilterEngine;
pub use filter::OutboundRequest;
pub use policy::EgressPolicy;
pub use scanner::LocalRules;
pub use scanner::RemoteScanner;
pub use scanner::SecretScanner;
pub use tls::CertAuthority;
