//! Command-line argument parsing.

use clap::Parser;

/// wakevmd - JIT VM activator driven by DNS queries
#[derive(Parser, Debug)]
#[command(name = "wakevmd")]
#[command(about = "Starts dormant VMs on demand when their DNS name is queried")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/wakevm/wakevmd.yaml")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Hypervisor backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendArg>,

    /// Backend connection string (libvirt URI, or URI:PASSWORD for backend X)
    #[arg(long)]
    pub connstr: Option<String>,

    /// Address:port to bind the DNS server on
    #[arg(long)]
    pub listen: Option<String>,

    /// Upstream resolver to forward unmatched queries to (host:port)
    #[arg(long)]
    pub forward_resolver: Option<String>,

    /// Address of the gARP notifier (host:port); omit to disable gARP
    #[arg(long)]
    pub garp_addr: Option<String>,

    /// Initial registry capacity hint
    #[arg(long, default_value_t = 7)]
    pub vm_count: usize,

    /// Use XML-RPC instead of JSON-RPC when talking to backend X
    #[arg(long)]
    pub xapi_xml_rpc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    Libvirt,
    Xapi,
    Mock,
}
