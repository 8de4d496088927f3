//! Stepmirror Common Library
//!
//! Shared types, configuration and the reporting service client.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use client::{HttpReportingClient, ReportingClient};
pub use config::{LaunchConfig, ReporterConfig};
pub use error::{Error, Result};
pub use types::*;

/// Stepmirror version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
