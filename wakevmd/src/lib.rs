//! `wakevmd` — a DNS-triggered just-in-time VM activator.
//!
//! Fronts a pool of dormant VMs with an authoritative DNS zone. A query
//! for a bound name activates the VM on the hypervisor before the
//! answer is returned; VMs idle past their TTL are torn down by the
//! reaper. See [`engine`] for the core state machine.

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod reaper;
pub mod registry;
pub mod server;
