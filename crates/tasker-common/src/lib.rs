//! # Tasker Common
//!
//! Logging configuration shared by the Tasker offline crates.
//!
//! Library crates only emit `tracing` events; binaries call [`init_logging`]
//! once at startup to install a subscriber.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
