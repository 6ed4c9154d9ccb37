//! `wakevmd` — starts dormant VMs on demand when their DNS name is queried.
//!
//! ```bash
//! wakevmd --config /etc/wakevm/wakevmd.yaml
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use wakevm_dns::FallbackResolver;
use wakevm_garp::GarpNotifier;
use wakevm_hypervisor::HypervisorDriver;

use wakevmd::cli::Args;
use wakevmd::clock::SystemClock;
use wakevmd::config::{Config, HypervisorBackend};
use wakevmd::engine::{Engine, EngineConfig};
use wakevmd::reaper::Reaper;
use wakevmd::registry::Registry;
use wakevmd::server;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    wakevm_common::init_logging(&args.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting wakevmd");

    let config = match Config::load(&args.config) {
        Ok(cfg) => {
            info!(path = %args.config, "configuration loaded");
            cfg
        }
        Err(e) if args.config == "/etc/wakevm/wakevmd.yaml" => {
            warn!(error = %e, "no config file found, using defaults");
            Config::default()
        }
        Err(e) => {
            error!(error = %e, path = %args.config, "failed to load configuration");
            return Err(e);
        }
    };
    let config = config.with_cli_overrides(&args);

    let driver = build_driver(&config).await?;

    let fallback = config
        .dns
        .forward_resolver
        .as_ref()
        .map(|addr| addr.parse().map(FallbackResolver::new))
        .transpose()?;

    let garp = config
        .garp
        .as_ref()
        .map(|g| Arc::new(GarpNotifier::new(g.addr.clone())));

    let registry = Arc::new(Registry::with_capacity(config.reaper.initial_capacity_hint));
    let clock = Arc::new(SystemClock);

    let engine = Arc::new(Engine::new(
        driver.clone(),
        registry.clone(),
        fallback,
        garp,
        clock.clone(),
        EngineConfig::default(),
    ));

    for vm in &config.vms {
        if let Err(e) = engine
            .add_vm(
                &vm.domain,
                &vm.name,
                vm.ip,
                vm.stop_mode.into(),
                Duration::from_secs_f64(vm.response_delay_secs),
                vm.ttl_secs,
            )
            .await
        {
            error!(error = %e, vm = %vm.name, "failed to register VM at startup");
        }
    }

    let reaper = Reaper::new(
        registry,
        driver,
        clock,
        Duration::from_secs(config.reaper.interval_secs),
    );
    tokio::spawn(async move {
        reaper.run().await;
    });

    server::run(&config.dns.listen_address, engine).await
}

async fn build_driver(config: &Config) -> Result<Arc<dyn HypervisorDriver>> {
    match config.hypervisor.backend {
        HypervisorBackend::Mock => {
            info!("using mock hypervisor backend");
            Ok(Arc::new(wakevm_hypervisor::MockBackend::new()))
        }
        HypervisorBackend::Libvirt => {
            #[cfg(feature = "libvirt")]
            {
                let uri = config
                    .hypervisor
                    .connstr
                    .as_deref()
                    .unwrap_or("qemu:///system");
                info!(uri, "connecting to libvirt");
                let backend = wakevm_hypervisor::LibvirtBackend::new(uri).await?;
                Ok(Arc::new(backend))
            }
            #[cfg(not(feature = "libvirt"))]
            {
                anyhow::bail!("libvirt backend requested but this build has the feature disabled");
            }
        }
        HypervisorBackend::Xapi => {
            let connstr = config
                .hypervisor
                .connstr
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("backend xapi requires a connstr"))?;
            let transport = if config.hypervisor.xapi_xml_rpc {
                wakevm_hypervisor::xapi::RpcTransport::XmlRpc
            } else {
                wakevm_hypervisor::xapi::RpcTransport::JsonRpc
            };
            info!("connecting to backend X");
            let backend = wakevm_hypervisor::XapiBackend::new(connstr, transport).await?;
            Ok(Arc::new(backend))
        }
    }
}
