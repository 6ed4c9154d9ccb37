//! Backend L: the local libvirt/QEMU hypervisor.

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys;

use crate::error::{BackendFailure, Result};
use crate::traits::HypervisorDriver;
use crate::types::{MacAddress, VmHandle, VmPowerState};
use crate::xml::mac_from_domain_xml;

/// Libvirt hypervisor backend, holding one long-lived connection shared
/// across all query-path and reaper tasks.
pub struct LibvirtBackend {
    connection: Connect,
}

impl LibvirtBackend {
    /// Connect to libvirt at `uri` (e.g. `qemu:///system`).
    pub async fn new(uri: &str) -> Result<Self> {
        info!(uri = %uri, "connecting to libvirt");
        let connection = Connect::open(Some(uri))
            .map_err(|e| BackendFailure::new("libvirt connect", e))?;
        Ok(Self { connection })
    }

    fn domain(&self, handle: &VmHandle) -> Result<Domain> {
        let VmHandle::Libvirt(uuid) = handle else {
            return Err(BackendFailure::new(
                "libvirt lookup",
                "handle is not a libvirt handle",
            ));
        };
        Domain::lookup_by_uuid_string(&self.connection, uuid)
            .map_err(|e| BackendFailure::new(format!("libvirt lookup {uuid}"), e))
    }

    fn state_from_libvirt(state: sys::virDomainState) -> VmPowerState {
        match state {
            sys::VIR_DOMAIN_RUNNING => VmPowerState::Running,
            sys::VIR_DOMAIN_PAUSED => VmPowerState::Paused,
            sys::VIR_DOMAIN_SHUTDOWN => VmPowerState::Shutdown,
            sys::VIR_DOMAIN_SHUTOFF => VmPowerState::Shutoff,
            sys::VIR_DOMAIN_CRASHED => VmPowerState::Crashed,
            sys::VIR_DOMAIN_PMSUSPENDED => VmPowerState::Suspended,
            sys::VIR_DOMAIN_BLOCKED => VmPowerState::Blocked,
            sys::VIR_DOMAIN_NOSTATE => VmPowerState::NoState,
            _ => VmPowerState::NoState,
        }
    }
}

#[async_trait]
impl HypervisorDriver for LibvirtBackend {
    #[instrument(skip(self))]
    async fn lookup_by_name(&self, name: &str) -> Result<VmHandle> {
        let domain = Domain::lookup_by_name(&self.connection, name)
            .map_err(|e| BackendFailure::new(format!("libvirt lookup_by_name {name}"), e))?;
        let uuid = domain
            .get_uuid_string()
            .map_err(|e| BackendFailure::new("libvirt get_uuid_string", e))?;
        Ok(VmHandle::Libvirt(uuid))
    }

    #[instrument(skip(self))]
    async fn get_mac(&self, handle: &VmHandle) -> Result<Option<MacAddress>> {
        let domain = self.domain(handle)?;
        let xml = domain
            .get_xml_desc(0)
            .map_err(|e| BackendFailure::new("libvirt get_xml_desc", e))?;
        Ok(mac_from_domain_xml(&xml))
    }

    #[instrument(skip(self))]
    async fn get_power_state(&self, handle: &VmHandle) -> Result<VmPowerState> {
        let domain = self.domain(handle)?;
        let (state, _) = domain
            .get_state()
            .map_err(|e| BackendFailure::new("libvirt get_state", e))?;
        Ok(Self::state_from_libvirt(state))
    }

    #[instrument(skip(self))]
    async fn start(&self, handle: &VmHandle) -> Result<()> {
        let domain = self.domain(handle)?;
        domain
            .create()
            .map_err(|e| BackendFailure::new("libvirt start", e))?;
        debug!("domain started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume(&self, handle: &VmHandle) -> Result<()> {
        let domain = self.domain(handle)?;
        domain
            .resume()
            .map_err(|e| BackendFailure::new("libvirt resume", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn shutdown(&self, handle: &VmHandle) -> Result<()> {
        let domain = self.domain(handle)?;
        domain
            .shutdown()
            .map_err(|e| BackendFailure::new("libvirt shutdown", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn destroy(&self, handle: &VmHandle) -> Result<()> {
        let domain = self.domain(handle)?;
        domain
            .destroy()
            .map_err(|e| BackendFailure::new("libvirt destroy", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn suspend(&self, handle: &VmHandle) -> Result<()> {
        let domain = self.domain(handle)?;
        domain
            .suspend()
            .map_err(|e| BackendFailure::new("libvirt suspend", e))?;
        Ok(())
    }
}
