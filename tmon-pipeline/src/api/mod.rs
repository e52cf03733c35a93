//! HTTP API handlers for tmon-pipeline
//!
//! Thin boundary over the pipeline: request validation, then a call into the
//! registry, accumulator or analysis service.

pub mod analysis;
pub mod buffers;
pub mod health;
pub mod monitor;
pub mod sse;

pub use analysis::analysis_routes;
pub use buffers::buffer_routes;
pub use health::health_routes;
pub use monitor::monitor_routes;
pub use sse::event_stream;
