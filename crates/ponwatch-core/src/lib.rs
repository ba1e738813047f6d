//! # ponwatch-core
//!
//! Shared vocabulary for the EPON telemetry compliance pipeline:
//! - device identity and scoping types
//! - immutable per-device metric snapshots
//! - compliance findings, verified reports and the rule table
//! - threshold and pipeline configuration with startup validation
//!
//! Everything here is plain data plus validation. Evaluation logic lives
//! in `ponwatch-compliance`, caching in `ponwatch-cache`, orchestration
//! in `ponwatch-pipeline`.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod finding;
pub mod snapshot;
pub mod types;

pub use config::{PipelineConfig, RuleConfigError, ThresholdConfig};
pub use finding::{
    ComplianceFinding, Comparison, FindingValue, MetricDimension, RuleId, Verdict, VerifiedReport,
};
pub use snapshot::MetricSnapshot;
pub use types::{DeviceScope, DspState, Health, OnuId, OperState, Severity};
