//! Type definitions shared by every hypervisor backend.

use serde::{Deserialize, Serialize};

/// The policy applied when the reaper decides to stop a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStopMode {
    /// Power the VM off immediately (`destroy`/`force_stop`).
    Destroy,
    /// Suspend to disk, preserving guest state.
    Suspend,
    /// Send an ACPI shutdown and let the guest power itself off.
    Shutdown,
}

/// Union of both backends' power states.
///
/// Backend L (libvirt) and backend X (remote HTTP-RPC) each map their
/// native state representation onto this enum; no other component ever
/// sees a backend-native state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmPowerState {
    Running,
    Paused,
    Shutdown,
    Shutoff,
    NoState,
    Blocked,
    Crashed,
    Suspended,
    Halted,
}

/// Opaque handle to a VM at the hypervisor, one variant per backend.
///
/// Exactly one variant is populated for any given [`crate::VmMetadata`];
/// see invariant 5 in the registry's documentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmHandle {
    /// Backend L: a libvirt domain UUID.
    Libvirt(String),
    /// Backend X: a remote management API object reference.
    Xapi(String),
}

impl VmHandle {
    /// The raw identifier string, regardless of backend.
    pub fn as_str(&self) -> &str {
        match self {
            VmHandle::Libvirt(s) => s,
            VmHandle::Xapi(s) => s,
        }
    }
}

/// A MAC address, stored as six raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Parse the colon-separated hex form libvirt XML and most wire
    /// protocols use (`52:54:00:12:34:56`).
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next()?;
            *byte = u8::from_str_radix(part, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(MacAddress(bytes))
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_round_trips() {
        let mac = MacAddress::parse("52:54:00:ab:cd:ef").unwrap();
        assert_eq!(mac.to_string(), "52:54:00:ab:cd:ef");
    }

    #[test]
    fn mac_rejects_malformed_input() {
        assert!(MacAddress::parse("52:54:00:ab:cd").is_none());
        assert!(MacAddress::parse("not-a-mac").is_none());
    }

    #[test]
    fn handle_as_str_unwraps_either_variant() {
        assert_eq!(VmHandle::Libvirt("abc".into()).as_str(), "abc");
        assert_eq!(VmHandle::Xapi("OpaqueRef:1".into()).as_str(), "OpaqueRef:1");
    }
}
