//! Dual-indexed store of VM metadata and mutable per-VM statistics.
//!
//! Pure in-memory data store: no I/O, no synchronization with the
//! hypervisor. Keeping the registry consistent with what's actually
//! running at the backend is the activation engine's job, not this
//! module's.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use wakevm_hypervisor::{MacAddress, VmHandle, VmStopMode};

/// One managed VM: identity, hypervisor handle, and mutable stats.
///
/// Counters are mutated only by the activation engine on the query
/// path; the reaper only reads them to decide who's expired.
#[derive(Debug)]
pub struct VmMetadata {
    pub name: String,
    pub domain: String,
    pub handle: VmHandle,
    pub mac: Option<MacAddress>,
    pub ip: Ipv4Addr,
    pub response_delay: Duration,
    /// Reap TTL in seconds — twice the DNS record TTL, per `AddVm`.
    pub ttl: u32,
    pub stop_mode: VmStopMode,
    pub started_ts: u64,
    pub requested_ts: u64,
    pub total_requests: u64,
    pub total_starts: u64,
}

impl VmMetadata {
    fn new(
        name: String,
        domain: String,
        handle: VmHandle,
        mac: Option<MacAddress>,
        ip: Ipv4Addr,
        response_delay: Duration,
        ttl: u32,
        stop_mode: VmStopMode,
    ) -> Self {
        Self {
            name,
            domain,
            handle,
            mac,
            ip,
            response_delay,
            ttl,
            stop_mode,
            started_ts: 0,
            requested_ts: 0,
            total_requests: 0,
            total_starts: 0,
        }
    }
}

pub type Entry = Arc<Mutex<VmMetadata>>;

/// Dual-indexed registry: by registered DNS domain (case-insensitive)
/// and by hypervisor VM name (exact match). Both indexes always point
/// at the same record — see invariant 1.
#[derive(Default)]
pub struct Registry {
    by_domain: RwLock<HashMap<String, Entry>>,
    by_name: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn with_capacity(hint: usize) -> Self {
        Self {
            by_domain: RwLock::new(HashMap::with_capacity(hint)),
            by_name: RwLock::new(HashMap::with_capacity(hint)),
        }
    }

    /// Insert or reuse a VM record.
    ///
    /// If `name` already has a record, its counters and timestamps are
    /// preserved, the domain mapping is re-bound to `domain`, and the
    /// handle is left unchanged (per `AddVm`'s idempotent re-registration
    /// rule — the caller is expected to have already confirmed the
    /// handle via `lookup_by_name`, but we never silently swap one handle
    /// for another on a second `AddVm`).
    pub fn insert(
        &self,
        domain: &str,
        name: &str,
        handle: VmHandle,
        mac: Option<MacAddress>,
        ip: Ipv4Addr,
        response_delay: Duration,
        ttl: u32,
        stop_mode: VmStopMode,
    ) -> Entry {
        let domain_key = domain.to_ascii_lowercase();

        if let Some(existing) = self.by_name.read().unwrap().get(name).cloned() {
            let old_domain = {
                let mut meta = existing.lock().unwrap();
                let old_domain = meta.domain.clone();
                meta.domain = domain_key.clone();
                meta.mac = mac;
                meta.ip = ip;
                meta.response_delay = response_delay;
                meta.ttl = ttl;
                meta.stop_mode = stop_mode;
                old_domain
            };
            let mut by_domain = self.by_domain.write().unwrap();
            if old_domain != domain_key {
                by_domain.remove(&old_domain);
            }
            by_domain.insert(domain_key, existing.clone());
            drop(by_domain);
            return existing;
        }

        let meta = Arc::new(Mutex::new(VmMetadata::new(
            name.to_string(),
            domain_key.clone(),
            handle,
            mac,
            ip,
            response_delay,
            ttl,
            stop_mode,
        )));

        self.by_domain
            .write()
            .unwrap()
            .insert(domain_key, meta.clone());
        self.by_name.write().unwrap().insert(name.to_string(), meta.clone());
        meta
    }

    pub fn by_domain(&self, domain: &str) -> Option<Entry> {
        self.by_domain
            .read()
            .unwrap()
            .get(&domain.to_ascii_lowercase())
            .cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Entry> {
        self.by_name.read().unwrap().get(name).cloned()
    }

    /// Visit a snapshot of all records, keyed by VM name. Used by the
    /// reaper, which wants a stable list to iterate without holding the
    /// registry lock across `.await` points.
    pub fn iterate_by_name(&self) -> Vec<Entry> {
        self.by_name.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> VmHandle {
        VmHandle::Libvirt(name.to_string())
    }

    #[test]
    fn insert_populates_both_indexes_with_the_same_record() {
        let registry = Registry::with_capacity(4);
        registry.insert(
            "www.mirage.io",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(1),
            120,
            VmStopMode::Shutdown,
        );

        let by_domain = registry.by_domain("WWW.mirage.io").unwrap();
        let by_name = registry.by_name("www").unwrap();
        assert!(Arc::ptr_eq(&by_domain, &by_name));
    }

    #[test]
    fn second_insert_with_same_name_preserves_counters() {
        let registry = Registry::with_capacity(4);
        let first = registry.insert(
            "www.mirage.io",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(1),
            120,
            VmStopMode::Shutdown,
        );
        first.lock().unwrap().total_requests = 5;

        let second = registry.insert(
            "www.mirage.io",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(1),
            120,
            VmStopMode::Shutdown,
        );

        assert_eq!(second.lock().unwrap().total_requests, 5);
    }

    #[test]
    fn re_registering_under_a_new_domain_drops_the_stale_alias() {
        let registry = Registry::with_capacity(4);
        registry.insert(
            "old.mirage.io",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(1),
            120,
            VmStopMode::Shutdown,
        );
        assert!(registry.by_domain("old.mirage.io").is_some());

        registry.insert(
            "new.mirage.io",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(1),
            120,
            VmStopMode::Shutdown,
        );

        assert!(registry.by_domain("old.mirage.io").is_none());
        assert!(registry.by_domain("new.mirage.io").is_some());
    }

    #[test]
    fn domain_lookup_is_case_insensitive() {
        let registry = Registry::with_capacity(4);
        registry.insert(
            "Www.Mirage.IO",
            "www",
            handle("uuid-1"),
            None,
            "10.0.0.7".parse().unwrap(),
            Duration::from_secs(0),
            120,
            VmStopMode::Destroy,
        );
        assert!(registry.by_domain("www.mirage.io").is_some());
    }
}
