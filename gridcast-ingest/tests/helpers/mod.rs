//! Test helper utilities
//!
//! Shared by the gridcast-ingest integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_sources;

pub use db_utils::{count_rows, create_test_db, driver_id, seed_race};
pub use fake_sources::{records, Script, ScriptedSource};
