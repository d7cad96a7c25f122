use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::HostId;

/// Hosts that completed a task successfully and hosts excluded from
/// scheduling. Both lists keep insertion order and never shrink.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReputation {
    whitelist: Vec<HostId>,
    blacklist: Vec<HostId>,
}

impl HostReputation {
    pub fn whitelist(&self) -> &[HostId] {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &[HostId] {
        &self.blacklist
    }

    pub fn is_whitelisted(&self, host: &HostId) -> bool {
        self.whitelist.contains(host)
    }

    pub fn is_blacklisted(&self, host: &HostId) -> bool {
        self.blacklist.contains(host)
    }

    /// Returns true if the host was not whitelisted before.
    fn add_to_whitelist(&mut self, host: &HostId) -> bool {
        if self.is_whitelisted(host) {
            false
        } else {
            self.whitelist.push(host.clone());
            true
        }
    }

    /// Returns true if the host was not blacklisted before.
    fn add_to_blacklist(&mut self, host: &HostId) -> bool {
        if self.is_blacklisted(host) {
            false
        } else {
            self.blacklist.push(host.clone());
            true
        }
    }
}

/// [`HostReputation`] that can be shared by several dispatch loops.
#[derive(Debug, Default)]
pub struct ReputationTracker {
    inner: Mutex<HostReputation>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, host: &HostId) -> bool {
        let added = self.lock().add_to_whitelist(host);
        if added {
            log::debug!("Host {host} whitelisted");
        }
        added
    }

    pub fn record_failure(&self, host: &HostId) -> bool {
        let added = self.lock().add_to_blacklist(host);
        if added {
            log::debug!("Host {host} blacklisted");
        }
        added
    }

    pub fn is_blacklisted(&self, host: &HostId) -> bool {
        self.lock().is_blacklisted(host)
    }

    pub fn snapshot(&self) -> HostReputation {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostReputation> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
