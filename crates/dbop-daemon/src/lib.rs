//! dbop Daemon library
//!
//! This module provides the core components for the dbop daemon:
//! - Layered configuration
//! - Manifest seeding of managed deployments
//! - Scheduler driving the reconciliation passes
//! - Daemon lifecycle and logging setup

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod scheduler;

pub use config::{DaemonConfig, LoggingConfig};
pub use daemon::{shutdown_signal, Daemon};
pub use error::{DaemonError, DaemonResult};
pub use manifest::Manifest;
pub use scheduler::{PassSummary, Scheduler};
