//! Periodically stops VMs that have gone idle past their reap TTL.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use wakevm_hypervisor::{HypervisorDriver, VmPowerState, VmStopMode};

use crate::clock::Clock;
use crate::registry::Registry;

/// Drives the teardown side of the VM lifecycle.
///
/// Runs on a fixed cadence (default 10s). Each sweep snapshots the
/// registry's by-name list, then stops every record whose
/// `now - requested_ts > ttl`, independent of whether it's ever been
/// queried (`requested_ts == 0` uses the same rule, epoch-anchored).
pub struct Reaper {
    registry: Arc<Registry>,
    driver: Arc<dyn HypervisorDriver>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Reaper {
    pub fn new(
        registry: Arc<Registry>,
        driver: Arc<dyn HypervisorDriver>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            driver,
            clock,
            interval,
        }
    }

    /// Run sweeps forever on `self.interval`. Intended to be spawned as a
    /// background task; never returns.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One pass over the registry. Exposed separately from `run` so
    /// tests can drive sweeps deterministically against a fake clock.
    pub async fn sweep(&self) {
        let now = self.clock.now();
        let entries = self.registry.iterate_by_name();

        for entry in entries {
            let (name, handle, ttl, requested_ts, stop_mode) = {
                let meta = entry.lock().unwrap();
                (
                    meta.name.clone(),
                    meta.handle.clone(),
                    meta.ttl as u64,
                    meta.requested_ts,
                    meta.stop_mode,
                )
            };

            if now.saturating_sub(requested_ts) <= ttl {
                continue;
            }

            if let Err(e) = self.stop_vm(&name, &handle, stop_mode).await {
                warn!(error = %e, vm = %name, "reaper: stop failed, will retry next sweep");
            }
        }
    }

    async fn stop_vm(
        &self,
        name: &str,
        handle: &wakevm_hypervisor::VmHandle,
        stop_mode: VmStopMode,
    ) -> wakevm_hypervisor::error::Result<()> {
        let state = self.driver.get_power_state(handle).await?;
        if state != VmPowerState::Running {
            return Ok(());
        }

        info!(vm = name, ?stop_mode, "reaping idle VM");
        match stop_mode {
            VmStopMode::Shutdown => self.driver.shutdown(handle).await,
            VmStopMode::Suspend => self.driver.suspend(handle).await,
            VmStopMode::Destroy => self.driver.destroy(handle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use wakevm_hypervisor::MockBackend;

    fn registry_with_one_vm(backend: &MockBackend, ttl: u32, state: VmPowerState) -> Arc<Registry> {
        backend.register("www", state, None);
        let registry = Arc::new(Registry::with_capacity(1));
        registry.insert(
            "mirage.io",
            "www",
            wakevm_hypervisor::VmHandle::Libvirt("www".to_string()),
            None,
            Ipv4Addr::new(10, 0, 0, 7),
            Duration::ZERO,
            ttl,
            VmStopMode::Shutdown,
        );
        registry
    }

    #[tokio::test]
    async fn stops_a_running_vm_past_its_ttl_exactly_once() {
        let backend = Arc::new(MockBackend::new());
        let registry = registry_with_one_vm(&backend, 60, VmPowerState::Running);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let reaper = Reaper::new(registry.clone(), backend.clone(), clock.clone(), Duration::from_secs(10));

        clock.advance(60 * 2 + 1);
        reaper.sweep().await;
        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Shutoff);

        // second sweep: already shutoff, no further driver mutation expected
        reaper.sweep().await;
        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Shutoff);
    }

    #[tokio::test]
    async fn paused_vm_is_not_touched_even_when_expired() {
        let backend = Arc::new(MockBackend::new());
        let registry = registry_with_one_vm(&backend, 60, VmPowerState::Paused);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let reaper = Reaper::new(registry, backend.clone(), clock.clone(), Duration::from_secs(10));

        clock.advance(1000);
        reaper.sweep().await;

        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Paused);
    }

    #[tokio::test]
    async fn vm_within_ttl_is_left_running() {
        let backend = Arc::new(MockBackend::new());
        let registry = registry_with_one_vm(&backend, 600, VmPowerState::Running);
        let clock = Arc::new(crate::clock::FakeClock::new(0));
        let reaper = Reaper::new(registry, backend.clone(), clock.clone(), Duration::from_secs(10));

        clock.advance(5);
        reaper.sweep().await;

        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Running);
    }
}
