//! A trie-backed authoritative DNS zone, supporting exactly the record
//! types this system serves: SOA and A.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, SOA};
use hickory_proto::rr::{Name, RData, Record, RecordType};

/// The result of a zone lookup: a response code and the matching records
/// (empty unless `rcode == NoError`).
#[derive(Debug, Clone)]
pub struct Answer {
    pub rcode: ResponseCode,
    pub records: Vec<Record>,
}

/// In-memory authoritative zone.
///
/// Populated once at startup by [`Zone::add_soa`]/[`Zone::add_a`] (called
/// from `AddVm`); never mutated again at steady state, so no internal
/// synchronization is needed beyond what the caller already provides.
#[derive(Debug, Default)]
pub struct Zone {
    records: HashMap<(Name, RecordType), Vec<Record>>,
}

impl Zone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an SOA record for `domain`, using the VM's DNS TTL as the
    /// basis for every SOA timer, per the defaults in the spec:
    /// `refresh = ttl`, `retry = 3`, `expire = ttl*2`, `minimum = ttl*2`,
    /// `neg_ttl = ttl`.
    pub fn add_soa(&mut self, domain: &str, ttl: u32, serial: u32) -> Result<(), ZoneError> {
        let name = parse_name(domain)?;

        let rname = parse_name(&format!("hostmaster.{domain}")).unwrap_or_else(|_| name.clone());

        let soa = SOA::new(
            name.clone(),
            rname,
            serial,
            ttl as i32,
            3,
            (ttl * 2) as i32,
            ttl * 2,
        );

        let record = Record::from_rdata(name.clone(), ttl, RData::SOA(soa));
        self.records
            .entry((name, RecordType::SOA))
            .or_default()
            .push(record);
        Ok(())
    }

    /// Add an A record mapping `name` to `ip`, valid for `ttl` seconds.
    pub fn add_a(&mut self, name: &str, ttl: u32, ip: Ipv4Addr) -> Result<(), ZoneError> {
        let owner = parse_name(name)?;
        let record = Record::from_rdata(owner.clone(), ttl, RData::A(A(ip)));
        self.records
            .entry((owner, RecordType::A))
            .or_default()
            .push(record);
        Ok(())
    }

    /// Point lookup by `(name, qtype)`.
    pub fn answer(&self, name: &str, qtype: RecordType) -> Answer {
        let Ok(owner) = parse_name(name) else {
            return Answer {
                rcode: ResponseCode::FormErr,
                records: Vec::new(),
            };
        };

        match self.records.get(&(owner, qtype)) {
            Some(records) if !records.is_empty() => Answer {
                rcode: ResponseCode::NoError,
                records: records.clone(),
            },
            _ => Answer {
                rcode: ResponseCode::NXDomain,
                records: Vec::new(),
            },
        }
    }

    /// Convenience wrapper: true iff `answer(name, qtype).rcode == NoError`.
    pub fn has(&self, name: &str, qtype: RecordType) -> bool {
        self.answer(name, qtype).rcode == ResponseCode::NoError
    }

    /// True if an SOA already exists for `domain`.
    pub fn has_soa(&self, domain: &str) -> bool {
        parse_name(domain)
            .map(|n| self.has(&n.to_ascii(), RecordType::SOA))
            .unwrap_or(false)
    }
}

fn parse_name(s: &str) -> Result<Name, ZoneError> {
    Name::from_str(s).map_err(|e| ZoneError::InvalidName(s.to_string(), e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("invalid DNS name {0}: {1}")]
    InvalidName(String, String),
}
