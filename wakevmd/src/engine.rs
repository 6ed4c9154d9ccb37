//! The activation engine: ties a DNS query to a registry lookup, a
//! hypervisor start/resume, and the answer that's ultimately served.
//!
//! This is the core of the system. Every other module exists to give
//! this one somewhere to read from or call into.

use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, RecordType};
use tracing::{debug, info, warn};

use wakevm_dns::{FallbackResolver, Zone};
use wakevm_garp::GarpNotifier;
use wakevm_hypervisor::{HypervisorDriver, VmPowerState};

use crate::clock::Clock;
use crate::registry::Registry;

/// Behavior hooks the engine needs but that the spec leaves open-ended.
pub struct EngineConfig {
    /// Derives the SOA owner ("base domain") from a registered domain.
    /// Defaults to identity, per the design note: the source's active
    /// code path returns the input unchanged; a label-stripping variant
    /// existed but was commented out, so this crate does not guess at
    /// TLD-aware trimming. Exposed as a hook for callers who want it.
    pub base_domain_fn: fn(&str) -> String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_domain_fn: |domain| domain.to_string(),
        }
    }
}

/// Ties the DNS zone, the VM registry, the hypervisor driver, the gARP
/// notifier, and the fallback resolver together.
pub struct Engine {
    zone: std::sync::RwLock<Zone>,
    registry: Arc<Registry>,
    driver: Arc<dyn HypervisorDriver>,
    fallback: Option<FallbackResolver>,
    garp: Option<Arc<GarpNotifier>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        driver: Arc<dyn HypervisorDriver>,
        registry: Arc<Registry>,
        fallback: Option<FallbackResolver>,
        garp: Option<Arc<GarpNotifier>>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            zone: std::sync::RwLock::new(Zone::new()),
            registry,
            driver,
            fallback,
            garp,
            clock,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register (or re-register) a VM. See §4.6: looks up the handle and
    /// MAC at the hypervisor, lazily adds an SOA for the base domain,
    /// adds an A record for the queried domain, and inserts into the
    /// registry.
    pub async fn add_vm(
        &self,
        domain: &str,
        name: &str,
        ip: std::net::Ipv4Addr,
        stop_mode: wakevm_hypervisor::VmStopMode,
        response_delay: Duration,
        dns_ttl: u32,
    ) -> wakevm_hypervisor::error::Result<()> {
        let domain = normalize_name(domain);
        let domain = domain.as_str();
        let handle = self.driver.lookup_by_name(name).await?;
        let mac = self.driver.get_mac(&handle).await?;
        info!(name, found_mac = mac.is_some(), "resolved VM at hypervisor");

        let base_domain = (self.config.base_domain_fn)(domain);
        {
            let mut zone = self.zone.write().unwrap();
            if !zone.has_soa(&base_domain) {
                let serial = self.clock.now() as u32;
                if let Err(e) = zone.add_soa(&base_domain, dns_ttl, serial) {
                    warn!(error = %e, domain = %base_domain, "failed to add SOA");
                }
            }
            if let Err(e) = zone.add_a(domain, dns_ttl, ip) {
                warn!(error = %e, domain, "failed to add A record");
            }
        }

        self.registry.insert(
            domain,
            name,
            handle,
            mac,
            ip,
            response_delay,
            dns_ttl * 2,
            stop_mode,
        );

        Ok(())
    }

    /// Entry point: handle one incoming DNS query packet.
    ///
    /// Returns `None` when the server should not answer at all (malformed
    /// question count) — the caller is expected to drop the packet in
    /// that case.
    pub async fn process(&self, query: &Message) -> Option<Message> {
        let questions = query.queries();
        if questions.len() != 1 {
            return None;
        }
        let question = &questions[0];

        let qname = normalize_name(&question.name().to_string());
        let qtype = question.query_type();
        let qclass = question.query_class();

        let answer = self.zone.read().unwrap().answer(&qname, qtype);

        if answer.rcode != ResponseCode::NoError {
            return self.fallback_answer(query, &qname, qtype, qclass).await;
        }

        let Some(vm) = self.registry.by_domain(&qname) else {
            debug!(name = %qname, "query for a known zone name with no bound VM");
            return self.fallback_answer(query, &qname, qtype, qclass).await;
        };

        self.activate(&vm).await;

        Some(self.respond(query, ResponseCode::NoError, answer.records))
    }

    /// The activation sequence for a registry hit. Always completes (any
    /// backend failure is caught and logged); the zone answer is returned
    /// by the caller regardless of what happened here.
    async fn activate(&self, vm: &std::sync::Arc<std::sync::Mutex<crate::registry::VmMetadata>>) {
        let now = self.clock.now();
        let (handle, mac, ip, response_delay) = {
            let mut meta = vm.lock().unwrap();
            meta.total_requests += 1;
            meta.requested_ts = now;
            (
                meta.handle.clone(),
                meta.mac,
                meta.ip,
                meta.response_delay,
            )
        };

        let state = match self.driver.get_power_state(&handle).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to read VM power state");
                return;
            }
        };

        let started = match state {
            VmPowerState::Running => {
                info!(vm = handle.as_str(), "already running");
                return;
            }
            VmPowerState::Paused => match self.driver.resume(&handle).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "resume failed");
                    return;
                }
            },
            VmPowerState::Shutdown | VmPowerState::Shutoff | VmPowerState::Halted => {
                match self.driver.start(&handle).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "start failed");
                        return;
                    }
                }
            }
            VmPowerState::Blocked | VmPowerState::Crashed | VmPowerState::NoState | VmPowerState::Suspended => {
                info!(vm = handle.as_str(), ?state, "cannot be started from this state");
                return;
            }
        };

        if let (Some(mac), Some(notifier)) = (mac, self.garp.as_ref()) {
            if let Err(e) = notifier.send_garp(mac.0, ip).await {
                warn!(error = %e, "gARP notification failed");
            }
        }

        if started {
            let mut meta = vm.lock().unwrap();
            meta.started_ts = self.clock.now();
            meta.total_starts += 1;
            drop(meta);

            if !response_delay.is_zero() {
                tokio::time::sleep(response_delay).await;
            }
        }
    }

    async fn fallback_answer(
        &self,
        query: &Message,
        qname: &str,
        qtype: RecordType,
        qclass: DNSClass,
    ) -> Option<Message> {
        let Some(fallback) = self.fallback.as_ref() else {
            return None;
        };
        match fallback.resolve(qclass, qtype, qname).await {
            Some(records) => Some(self.respond(query, ResponseCode::NoError, records)),
            None => Some(self.respond(query, ResponseCode::ServFail, Vec::new())),
        }
    }

    fn respond(
        &self,
        query: &Message,
        rcode: ResponseCode,
        records: Vec<hickory_proto::rr::Record>,
    ) -> Message {
        let mut response = Message::new();
        response.set_id(query.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_response_code(rcode);
        for question in query.queries() {
            response.add_query(question.clone());
        }
        for record in records {
            response.add_answer(record);
        }
        response
    }
}

/// Strips the trailing root label DNS names carry in wire/string form, so
/// registry and zone keys match regardless of whether they came from a
/// parsed `Name` or a config file.
fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Builds a single-question query `Message`, the shape `process` expects.
/// Used by the server loop and by tests.
pub fn build_query(name: &str, qtype: RecordType) -> Message {
    let mut message = Message::new();
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    let mut query = Query::new();
    query.set_name(name.parse().expect("valid DNS name"));
    query.set_query_type(qtype);
    query.set_query_class(DNSClass::IN);
    message.add_query(query);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use wakevm_hypervisor::{MockBackend, VmPowerState, VmStopMode};

    fn test_engine(backend: Arc<MockBackend>, clock: Arc<crate::clock::FakeClock>) -> Engine {
        Engine::new(
            backend,
            Arc::new(Registry::with_capacity(4)),
            None,
            None,
            clock,
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn cold_start_is_started_exactly_once_with_the_configured_delay() {
        let backend = Arc::new(MockBackend::new());
        backend.register("www", VmPowerState::Shutoff, None);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = test_engine(backend.clone(), clock);

        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::from_millis(10),
                60,
            )
            .await
            .unwrap();

        let query = build_query("mirage.io", RecordType::A);
        let response = engine.process(&query).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);

        let vm = engine.registry().by_name("www").unwrap();
        let meta = vm.lock().unwrap();
        assert_eq!(meta.total_starts, 1);
        assert_eq!(meta.total_requests, 1);
        assert_eq!(
            backend.state_of("www").unwrap(),
            VmPowerState::Running
        );
    }

    #[tokio::test]
    async fn add_vm_stamps_the_soa_serial_from_the_clock() {
        let backend = Arc::new(MockBackend::new());
        backend.register("www", VmPowerState::Shutoff, None);
        let clock = Arc::new(crate::clock::FakeClock::new(424_242));
        let engine = test_engine(backend, clock);

        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::ZERO,
                60,
            )
            .await
            .unwrap();

        let answer = engine.zone.read().unwrap().answer("mirage.io", RecordType::SOA);
        let hickory_proto::rr::RData::SOA(soa) = &answer.records[0].data().unwrap() else {
            panic!("expected an SOA record");
        };
        assert_eq!(soa.serial(), 424_242);
    }

    #[tokio::test]
    async fn already_running_vm_is_not_restarted() {
        let backend = Arc::new(MockBackend::new());
        backend.register("www", VmPowerState::Running, None);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = test_engine(backend.clone(), clock);
        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::ZERO,
                60,
            )
            .await
            .unwrap();

        let query = build_query("mirage.io", RecordType::A);
        engine.process(&query).await.unwrap();

        let vm = engine.registry().by_name("www").unwrap();
        assert_eq!(vm.lock().unwrap().total_starts, 0);
    }

    #[tokio::test]
    async fn already_running_vm_does_not_resend_garp() {
        use wakevm_hypervisor::MacAddress;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let accept_count_task = accept_count.clone();
        tokio::spawn(async move {
            while let Ok((_stream, _)) = listener.accept().await {
                accept_count_task.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });

        let backend = Arc::new(MockBackend::new());
        let mac = MacAddress::parse("52:54:00:11:22:33").unwrap();
        backend.register("www", VmPowerState::Running, Some(mac));
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = Engine::new(
            backend,
            Arc::new(Registry::with_capacity(4)),
            None,
            Some(Arc::new(wakevm_garp::GarpNotifier::new(addr.to_string()))),
            clock,
            EngineConfig::default(),
        );
        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::ZERO,
                60,
            )
            .await
            .unwrap();

        let query = build_query("mirage.io", RecordType::A);
        engine.process(&query).await.unwrap();
        engine.process(&query).await.unwrap();

        // give the spawned acceptor a chance to observe any connection attempt
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(accept_count.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn paused_vm_is_resumed_not_started() {
        let backend = Arc::new(MockBackend::new());
        backend.register("www", VmPowerState::Paused, None);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = test_engine(backend.clone(), clock);
        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::ZERO,
                60,
            )
            .await
            .unwrap();

        let query = build_query("mirage.io", RecordType::A);
        engine.process(&query).await.unwrap();

        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Running);
        let vm = engine.registry().by_name("www").unwrap();
        assert_eq!(vm.lock().unwrap().total_starts, 1);
    }

    #[tokio::test]
    async fn crashed_vm_is_left_alone_but_answer_still_served() {
        let backend = Arc::new(MockBackend::new());
        backend.register("www", VmPowerState::Crashed, None);
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = test_engine(backend.clone(), clock);
        engine
            .add_vm(
                "mirage.io",
                "www",
                Ipv4Addr::new(10, 0, 0, 7),
                VmStopMode::Shutdown,
                Duration::ZERO,
                60,
            )
            .await
            .unwrap();

        let query = build_query("mirage.io", RecordType::A);
        let response = engine.process(&query).await.unwrap();
        assert_eq!(response.answers().len(), 1);
        assert_eq!(backend.state_of("www").unwrap(), VmPowerState::Crashed);
    }

    #[tokio::test]
    async fn malformed_multi_question_packet_yields_no_answer() {
        let backend = Arc::new(MockBackend::new());
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = test_engine(backend, clock);

        let mut query = build_query("mirage.io", RecordType::A);
        let extra = query.queries()[0].clone();
        query.add_query(extra);

        assert!(engine.process(&query).await.is_none());
    }

    #[tokio::test]
    async fn unregistered_name_falls_back() {
        let backend = Arc::new(MockBackend::new());
        let clock = Arc::new(crate::clock::FakeClock::new(1_000));
        let engine = Engine::new(
            backend,
            Arc::new(Registry::with_capacity(4)),
            None,
            None,
            clock,
            EngineConfig::default(),
        );

        let query = build_query("other.test", RecordType::A);
        assert!(engine.process(&query).await.is_none());
    }
}
