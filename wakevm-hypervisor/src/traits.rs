//! The hypervisor capability set every backend implements.
//!
//! This is the only place where backend L (libvirt) and backend X (a
//! remote HTTP-RPC hypervisor) differ; no call site outside this crate
//! examines which backend it's talking to.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MacAddress, VmHandle, VmPowerState};

/// Capability set a hypervisor driver implements.
///
/// Every operation fails with a single error kind, [`crate::error::BackendFailure`].
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    /// Resolve a VM's name at the hypervisor to its backend-native handle.
    async fn lookup_by_name(&self, name: &str) -> Result<VmHandle>;

    /// Fetch the VM's first NIC's MAC address, if the backend can
    /// determine one. Absence is not an error.
    async fn get_mac(&self, handle: &VmHandle) -> Result<Option<MacAddress>>;

    /// Current power state, mapped onto the shared [`VmPowerState`] enum.
    async fn get_power_state(&self, handle: &VmHandle) -> Result<VmPowerState>;

    /// Cold-start a VM from a stopped state.
    async fn start(&self, handle: &VmHandle) -> Result<()>;

    /// Resume a paused VM, preserving its in-memory state.
    async fn resume(&self, handle: &VmHandle) -> Result<()>;

    /// Request a graceful (ACPI) shutdown.
    async fn shutdown(&self, handle: &VmHandle) -> Result<()>;

    /// Power the VM off immediately.
    async fn destroy(&self, handle: &VmHandle) -> Result<()>;

    /// Suspend the VM to disk.
    async fn suspend(&self, handle: &VmHandle) -> Result<()>;
}
