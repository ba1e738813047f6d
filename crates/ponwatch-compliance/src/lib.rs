//! # ponwatch-compliance
//!
//! The pure computation core of the pipeline: structuring raw telemetry
//! fields into [`ponwatch_core::MetricSnapshot`]s, evaluating threshold
//! rules into severity-tagged findings, and the reflection pass that
//! cross-checks
//! the evaluator's output before a report is released.
//!
//! Everything in this crate is deterministic and non-suspending; the only
//! I/O boundary in the system (the telemetry fetch) lives in
//! `ponwatch-pipeline`.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod evaluator;
pub mod structurer;
pub mod verifier;

pub use evaluator::evaluate;
pub use structurer::{structure_record, MalformedRecord, RawRecord};
pub use verifier::{compose_report, verify, DeviceVerdict};
