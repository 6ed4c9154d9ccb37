//! In-memory authoritative DNS zone plus an upstream fallback resolver.

pub mod fallback;
pub mod zone;

pub use fallback::FallbackResolver;
pub use zone::{Answer, Zone, ZoneError};

pub use hickory_proto::op::ResponseCode;
pub use hickory_proto::rr::{Record, RecordType};
