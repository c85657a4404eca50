//! Pod registry: caller network identity mapped to an assigned branch.
//!
//! Shared mutable state read on every `/git` and `/gh` call. A single
//! mutex around a hash map is enough at dispatcher request volumes; all
//! writes are short-held.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A pod may only ever hold one branch assignment for its lifetime;
    /// re-registration with the same branch is an idempotent no-op, but a
    /// different branch is a conflict, never a silent change.
    #[error("pod {ip} is already registered for branch '{existing}'")]
    AlreadyRegistered { ip: IpAddr, existing: String },
}

#[derive(Debug, Default)]
pub struct PodRegistry {
    entries: Mutex<HashMap<IpAddr, String>>,
}

impl PodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, String>> {
        // No guard holds the lock across a panic site that could leave the
        // map inconsistent, so a poisoned lock is still safe to reuse.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, ip: IpAddr, branch: &str) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&ip) {
            if existing == branch {
                return Ok(());
            }
            return Err(RegistryError::AlreadyRegistered {
                ip,
                existing: existing.clone(),
            });
        }
        entries.insert(ip, branch.to_string());
        info!("registered pod {ip} for branch {branch}");
        Ok(())
    }

    /// Remove a pod, returning the branch it was registered for.
    pub fn deregister(&self, ip: IpAddr) -> Option<String> {
        let branch = self.lock().remove(&ip);
        if let Some(branch) = &branch {
            info!("deregistered pod {ip} (was branch {branch})");
        }
        branch
    }

    /// Branch assigned to a pod, or `None` for unregistered callers.
    pub fn branch_for(&self, ip: IpAddr) -> Option<String> {
        self.lock().get(&ip).cloned()
    }

    /// Snapshot of all (identity, branch) entries.
    pub fn entries(&self) -> Vec<(IpAddr, String)> {
        self.lock()
            .iter()
            .map(|(ip, branch)| (*ip, branch.clone()))
            .collect()
    }

    /// Remove every pod registered for `branch`, returning how many were
    /// removed. Used when a sandbox is deleted by branch name.
    pub fn remove_branch(&self, branch: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, assigned| assigned != branch);
        before - entries.len()
    }
}
