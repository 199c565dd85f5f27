//! # swcache common
//!
//! Pieces shared by every swcache crate.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock helpers for record timestamps and generation labels

pub mod clock;
pub mod logging;

pub use clock::{iso_instant, now_millis};
pub use logging::{init_logging, LogConfig, LogFormat};
