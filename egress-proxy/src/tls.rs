//! Interception CA and per-host leaf certificates.
//!
//! Sandboxes trust this CA (installed into their trust store at image
//! build time), which is what makes HTTPS inspection possible. Leaves
//! are minted on first CONNECT to a host and cached for the process
//! lifetime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use anyhow::Context;
use anyhow::Result;
use rcgen::BasicConstraints;
use rcgen::Certificate;
use rcgen::CertificateParams;
use rcgen::DnType;
use rcgen::IsCa;
use rcgen::KeyPair;
use rustls::ServerConfig;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::PrivatePkcs8KeyDer;
use tracing::info;
use tracing::warn;

const CA_COMMON_NAME: &str = "Warden Egress CA";

pub struct CertAuthority {
    ca_cert: Certificate,
    ca_key: KeyPair,
    ca_cert_pem: String,
    cache: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl CertAuthority {
    /// Load the CA from `cert_path`/`key_path`, generating and
    /// persisting a fresh one when either file is missing.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self> {
        if cert_path.is_file() && key_path.is_file() {
            let cert_pem = std::fs::read_to_string(cert_path)
                .with_context(|| format!("read {}", cert_path.display()))?;
            let key_pem = std::fs::read_to_string(key_path)
                .with_context(|| format!("read {}", key_path.display()))?;
            info!("loaded interception CA from {}", cert_path.display());
            return Self::from_pem(&cert_pem, &key_pem);
        }

        let authority = Self::generate()?;
        if let Err(err) = authority.persist(cert_path, key_path) {
            warn!("could not persist generated CA, continuing in-memory: {err}");
        } else {
            info!("generated interception CA at {}", cert_path.display());
        }
        Ok(authority)
    }

    pub fn generate() -> Result<Self> {
        let ca_key = KeyPair::generate().context("generate CA key")?;
        let mut params = CertificateParams::new(Vec::new()).context("CA params")?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, CA_COMMON_NAME);
        let ca_cert = params.self_signed(&ca_key).context("self-sign CA")?;
        let ca_cert_pem = ca_cert.pem();
        Ok(Self {
            ca_cert,
            ca_key,
            ca_cert_pem,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let ca_key = KeyPair::from_pem(key_pem).context("parse CA key")?;
        let params =
            CertificateParams::from_ca_cert_pem(cert_pem).context("parse CA certificate")?;
        let ca_cert = params.self_signed(&ca_key).context("rebuild CA certificate")?;
        Ok(Self {
            ca_cert,
            ca_key,
            ca_cert_pem: cert_pem.to_string(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn persist(&self, cert_path: &Path, key_path: &Path) -> Result<()> {
        if let Some(parent) = cert_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(cert_path, &self.ca_cert_pem)?;
        std::fs::write(key_path, self.ca_key.serialize_pem())?;
        Ok(())
    }

    /// PEM of the CA certificate, for distribution to sandboxes.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    fn cache_lock(&self) -> MutexGuard<'_, HashMap<String, Arc<ServerConfig>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// TLS server config presenting a leaf for `host`, minting and
    /// caching it on first use.
    pub fn server_config(&self, host: &str) -> Result<Arc<ServerConfig>> {
        if let Some(config) = self.cache_lock().get(host) {
            return Ok(config.clone());
        }

        let leaf_key = KeyPair::generate().context("generate leaf key")?;
        let mut params =
            CertificateParams::new(vec![host.to_string()]).context("leaf params")?;
        params.distinguished_name.push(DnType::CommonName, host);
        let leaf = params
            .signed_by(&leaf_key, &self.ca_cert, &self.ca_key)
            .with_context(|| format!("sign leaf for {host}"))?;

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![leaf.der().clone()], key_der)
            .context("build TLS config")?;
        // Interception speaks plain HTTP/1.1 inside the tunnel.
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let config = Arc::new(config);
        self.cache_lock()
            .insert(host.to_string(), config.clone());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_and_caches_leaf_configs() {
        let authority = CertAuthority::generate().unwrap();
        let first = authority.server_config("example.com").unwrap();
        let second = authority.server_config("example.com").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        let other = authority.server_config("other.test").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn pem_round_trip_preserves_the_key() {
        let authority = CertAuthority::generate().unwrap();
        let key_pem = authority.ca_key.serialize_pem();
        let reloaded = CertAuthority::from_pem(authority.ca_cert_pem(), &key_pem).unwrap();
        assert!(reloaded.server_config("example.com").is_ok());
    }

    #[test]
    fn load_or_generate_persists_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("ca.crt");
        let key_path = dir.path().join("ca.key");

        let first = CertAuthority::load_or_generate(&cert_path, &key_path).unwrap();
        assert!(cert_path.is_file());
        assert!(key_path.is_file());

        let second = CertAuthority::load_or_generate(&cert_path, &key_path).unwrap();
        assert_eq!(first.ca_cert_pem(), second.ca_cert_pem());
    }
}
