// src/lib.rs
// Public library surface for both binaries and the integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod decision;
pub mod error;
pub mod fallback;
pub mod guard;
pub mod model;
pub mod pacer;
pub mod pipeline;
pub mod runner;
pub mod tasks;
pub mod telemetry;

// Data sources and the analysis backends
pub mod analyze;
pub mod ingest;

// Channels and dispatch
pub mod notify;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::bootstrap::Runtime;
pub use crate::config::AppConfig;
pub use crate::telemetry::init_tracing;
