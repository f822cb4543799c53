//! # Gridcast Common Library
//!
//! Shared code for the gridcast services including:
//! - Canonical store schema and record models
//! - Configuration loading and root folder resolution
//! - Lap time and pit duration unit normalization

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
