//! Tasker Core Library
//!
//! This crate provides configuration, errors and host platform detection
//! shared by the Tasker offline crates.

pub mod config;
pub mod error;
pub mod platform;

pub use config::{OfflineConfig, DEFAULT_CACHE_NAME, DEFAULT_SHELL_ASSETS};
pub use error::{TaskerError, TaskerResult};
pub use platform::{is_pwa, DisplayMode, HostEnvironment, StaticHost};
