//! ---
//! rota_section: "01-core-functionality"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Shared primitives and utilities for the access core."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---
//! Shared primitives for the CareRota workspace.
//! This crate exposes configuration loading and tracing bootstrap utilities
//! consumed by the daemon and the client runtime.

pub mod config;
pub mod logging;

pub use config::{ApiConfig, AppConfig, IdentityConfig, LoggingConfig, MetricsConfig, SeedUser};
pub use logging::{init_tracing, LogFormat};
