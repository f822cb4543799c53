//! Shared utilities

pub mod db_retry;
pub mod http_retry;

pub use db_retry::retry_on_lock;
pub use http_retry::{is_retryable_status, ResilientClient, RetryPolicy};
