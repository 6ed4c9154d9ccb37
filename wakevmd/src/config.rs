//! Configuration for the wakevmd daemon.

use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use wakevm_hypervisor::VmStopMode;

use crate::cli::{Args, BackendArg};

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dns: DnsConfig,
    pub hypervisor: HypervisorConfig,
    pub garp: Option<GarpConfig>,
    pub reaper: ReaperConfig,
    pub vms: Vec<VmEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dns: DnsConfig::default(),
            hypervisor: HypervisorConfig::default(),
            garp: None,
            reaper: ReaperConfig::default(),
            vms: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "failed to parse config file")?;

        Ok(config)
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(backend) = args.backend {
            self.hypervisor.backend = match backend {
                BackendArg::Libvirt => HypervisorBackend::Libvirt,
                BackendArg::Xapi => HypervisorBackend::Xapi,
                BackendArg::Mock => HypervisorBackend::Mock,
            };
        }

        if let Some(ref connstr) = args.connstr {
            self.hypervisor.connstr = Some(connstr.clone());
        }

        self.hypervisor.xapi_xml_rpc = args.xapi_xml_rpc;

        if let Some(ref listen) = args.listen {
            self.dns.listen_address = listen.clone();
        }

        if let Some(ref forward) = args.forward_resolver {
            self.dns.forward_resolver = Some(forward.clone());
        }

        if let Some(ref garp_addr) = args.garp_addr {
            self.garp = Some(GarpConfig {
                addr: garp_addr.clone(),
            });
        }

        self.reaper.initial_capacity_hint = args.vm_count;

        self
    }
}

/// DNS server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Address:port to bind the authoritative DNS server on.
    pub listen_address: String,
    /// Upstream resolver for queries the local zone can't answer.
    pub forward_resolver: Option<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:53".to_string(),
            forward_resolver: None,
        }
    }
}

/// Hypervisor backend selection and connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    pub backend: HypervisorBackend,
    /// Libvirt URI, or `URI:PASSWORD` for backend X (username is hard-coded to `root`).
    pub connstr: Option<String>,
    /// Use XML-RPC rather than JSON-RPC when talking to backend X.
    pub xapi_xml_rpc: bool,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            backend: HypervisorBackend::Mock,
            connstr: None,
            xapi_xml_rpc: false,
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorBackend {
    /// Mock backend for testing/development
    Mock,
    /// Libvirt/QEMU backend
    Libvirt,
    /// Remote HTTP-RPC backend (JSON-RPC or XML-RPC)
    Xapi,
}

impl Default for HypervisorBackend {
    fn default() -> Self {
        Self::Mock
    }
}

/// gARP notifier configuration. Corresponds to the spec's
/// `synjitsu_domain` setting: an optional connection to a notifier,
/// established asynchronously at startup when configured.
#[derive(Debug, Clone, Deserialize)]
pub struct GarpConfig {
    /// `host:port` of the gARP notifier.
    pub addr: String,
}

/// Expiry reaper configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Sweep cadence, in seconds.
    pub interval_secs: u64,
    /// Initial registry capacity hint (the spec's `vm_count`).
    pub initial_capacity_hint: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            initial_capacity_hint: 7,
        }
    }
}

/// One managed VM, turned into an `AddVm` call at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct VmEntry {
    pub domain: String,
    pub name: String,
    pub ip: Ipv4Addr,
    pub stop_mode: VmStopModeConfig,
    /// Seconds to wait after Start/Resume before answering the query.
    pub response_delay_secs: f64,
    /// DNS TTL in seconds; the reap TTL is twice this (see `AddVm`).
    pub ttl_secs: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmStopModeConfig {
    Destroy,
    Suspend,
    Shutdown,
}

impl From<VmStopModeConfig> for VmStopMode {
    fn from(value: VmStopModeConfig) -> Self {
        match value {
            VmStopModeConfig::Destroy => VmStopMode::Destroy,
            VmStopModeConfig::Suspend => VmStopMode::Suspend,
            VmStopModeConfig::Shutdown => VmStopMode::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_mock_backend_and_ten_second_reaper() {
        let config = Config::default();
        assert_eq!(config.hypervisor.backend, HypervisorBackend::Mock);
        assert_eq!(config.reaper.interval_secs, 10);
    }

    #[test]
    fn parses_a_minimal_yaml_document() {
        let yaml = r#"
vms:
  - domain: mirage.io
    name: www
    ip: 10.0.0.7
    stop_mode: shutdown
    response_delay_secs: 1.0
    ttl_secs: 60
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.vms.len(), 1);
        assert_eq!(config.vms[0].domain, "mirage.io");
    }
}
