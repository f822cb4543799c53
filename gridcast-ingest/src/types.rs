//! Core types and the source adapter seam
//!
//! Each upstream source implements [`SourceAdapter`]. The fallback
//! coordinator only ever talks to this trait, so a new source is one new
//! impl plus an entry in the per-category chains.

use crate::error::SourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use gridcast_common::db::{
    AlignedFeatureRow, DataCategory, LapTimeRecord, NormalizedRecord, PitStopRecord,
    QualifyingRecord, RaceEntry, RaceKey, SourceId,
};

/// A native record that could not be mapped to canonical shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result of one adapter fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceBatch {
    pub records: Vec<NormalizedRecord>,
    /// Records skipped during mapping; counted as errors
    pub malformed: Vec<MalformedRecord>,
}

impl SourceBatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(records: Vec<NormalizedRecord>, malformed: Vec<MalformedRecord>) -> Self {
        Self { records, malformed }
    }

    /// No usable records (malformed ones do not count)
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// One upstream data source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Categories this source can ever provide
    fn supports(&self, category: DataCategory) -> bool;

    /// Fetch one category for one race
    ///
    /// Returns an empty batch, not an error, when the source legitimately
    /// has no data (outside its era, race not found).
    async fn fetch(
        &self,
        category: DataCategory,
        race: RaceKey,
    ) -> Result<SourceBatch, SourceError>;

    /// Upstream requests issued so far
    fn requests_made(&self) -> u64 {
        0
    }
}
