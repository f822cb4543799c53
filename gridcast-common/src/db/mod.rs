//! Canonical store schema and record models

pub mod init;
pub mod models;

pub use init::*;
pub use models::*;
