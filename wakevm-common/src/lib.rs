//! Shared utilities for the wakevm crates.
//!
//! ## Logging
//!
//! ```rust
//! use wakevm_common::init_logging;
//!
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
