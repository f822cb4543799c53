//! Canonical store access
//!
//! Query functions per table. Every write path is insert-only; natural-key
//! existence checks come first.

pub mod features;
pub mod lap_times;
pub mod pit_stops;
pub mod qualifying;
pub mod races;
pub mod runs;

use gridcast_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the canonical store and apply the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::debug!("Connecting to database: {}", db_path.display());
    gridcast_common::db::init_database(db_path).await
}
