//! Hypervisor abstraction layer.
//!
//! Provides one trait, [`HypervisorDriver`], implemented by two real
//! backends — libvirt/QEMU (backend L) and a remote HTTP-RPC hypervisor
//! (backend X) — plus an in-memory [`MockBackend`] for tests. Nothing
//! outside this crate examines which backend is in use.

pub mod error;
pub mod mock;
pub mod traits;
pub mod types;
mod xml;

#[cfg(feature = "libvirt")]
pub mod libvirt;

pub mod xapi;

pub use error::BackendFailure;
pub use mock::MockBackend;
pub use traits::HypervisorDriver;
pub use types::{MacAddress, VmHandle, VmPowerState, VmStopMode};

#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtBackend;

pub use xapi::XapiBackend;
