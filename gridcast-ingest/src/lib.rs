//! gridcast-ingest library interface
//!
//! Exposes the pipeline for the binary and for integration tests.

pub mod db;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod sources;
pub mod types;
pub mod utils;

pub use crate::error::{OrchestratorError, ScoringError, SourceError};
pub use crate::pipeline::Pipeline;
