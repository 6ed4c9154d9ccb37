//! In-memory hypervisor driver for tests and `--backend mock` development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

use crate::error::{BackendFailure, Result};
use crate::traits::HypervisorDriver;
use crate::types::{MacAddress, VmHandle, VmPowerState};

struct MockVm {
    state: VmPowerState,
    mac: Option<MacAddress>,
}

/// Simulates VM power-state transitions without any real hypervisor.
///
/// Registered with [`MockBackend::register`] rather than discovered by
/// `lookup_by_name`, since there's no real inventory to query.
pub struct MockBackend {
    vms: RwLock<HashMap<String, MockVm>>,
}

impl MockBackend {
    pub fn new() -> Self {
        info!("using mock hypervisor backend");
        Self {
            vms: RwLock::new(HashMap::new()),
        }
    }

    /// Register a VM under `name` with an initial state and optional MAC.
    pub fn register(&self, name: &str, state: VmPowerState, mac: Option<MacAddress>) {
        self.vms
            .write()
            .unwrap()
            .insert(name.to_string(), MockVm { state, mac });
    }

    /// Read back the current state, for test assertions.
    pub fn state_of(&self, name: &str) -> Option<VmPowerState> {
        self.vms.read().unwrap().get(name).map(|vm| vm.state)
    }

    fn set_state(&self, name: &str, state: VmPowerState) -> Result<()> {
        let mut vms = self.vms.write().unwrap();
        let vm = vms
            .get_mut(name)
            .ok_or_else(|| BackendFailure::new("mock set_state", format!("no such VM {name}")))?;
        vm.state = state;
        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HypervisorDriver for MockBackend {
    async fn lookup_by_name(&self, name: &str) -> Result<VmHandle> {
        if self.vms.read().unwrap().contains_key(name) {
            Ok(VmHandle::Libvirt(name.to_string()))
        } else {
            Err(BackendFailure::new(
                "mock lookup_by_name",
                format!("no such VM {name}"),
            ))
        }
    }

    async fn get_mac(&self, handle: &VmHandle) -> Result<Option<MacAddress>> {
        Ok(self
            .vms
            .read()
            .unwrap()
            .get(handle.as_str())
            .and_then(|vm| vm.mac))
    }

    async fn get_power_state(&self, handle: &VmHandle) -> Result<VmPowerState> {
        self.vms
            .read()
            .unwrap()
            .get(handle.as_str())
            .map(|vm| vm.state)
            .ok_or_else(|| BackendFailure::new("mock get_power_state", "no such VM"))
    }

    async fn start(&self, handle: &VmHandle) -> Result<()> {
        self.set_state(handle.as_str(), VmPowerState::Running)
    }

    async fn resume(&self, handle: &VmHandle) -> Result<()> {
        self.set_state(handle.as_str(), VmPowerState::Running)
    }

    async fn shutdown(&self, handle: &VmHandle) -> Result<()> {
        self.set_state(handle.as_str(), VmPowerState::Shutoff)
    }

    async fn destroy(&self, handle: &VmHandle) -> Result<()> {
        self.set_state(handle.as_str(), VmPowerState::Shutoff)
    }

    async fn suspend(&self, handle: &VmHandle) -> Result<()> {
        self.set_state(handle.as_str(), VmPowerState::Suspended)
    }
}
