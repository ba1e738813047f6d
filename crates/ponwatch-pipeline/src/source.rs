//! The raw telemetry source seam.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use ponwatch_compliance::RawRecord;
use ponwatch_core::DeviceScope;

/// The telemetry source could not produce raw records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The source is unreachable or returned an error.
    #[error("telemetry source unreachable: {0}")]
    Unreachable(String),

    /// The fetch exceeded its bounded timeout.
    #[error("telemetry fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// External collaborator that produces already-tokenized raw records.
///
/// This is the only suspension point in the pipeline; structuring,
/// evaluation and verification never await.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch the raw field mappings for every device in `scope`,
    /// chronologically ordered (oldest first) per device.
    async fn fetch_raw_records(&self, scope: &DeviceScope) -> Result<Vec<RawRecord>, FetchError>;
}
