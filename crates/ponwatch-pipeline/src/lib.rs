//! # ponwatch-pipeline
//!
//! The orchestration layer of the compliance pipeline:
//! - [`TelemetrySource`]: the seam to the external raw-telemetry
//!   collaborator, with a bounded fetch timeout;
//! - [`Pipeline`]: the per-request linear state machine
//!   (decide source → fetch or cache-hit → structure → evaluate →
//!   verify → publish);
//! - [`BackgroundRefresher`]: the timer-driven task that keeps the
//!   background cache tier warm;
//! - [`SimulatedSource`]: a drifting multi-ONU feed with scenario
//!   injection, for demos and tests.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod orchestrator;
pub mod refresher;
pub mod sim;
pub mod source;

pub use orchestrator::{Pipeline, QueryOutcome, Stage};
pub use refresher::{BackgroundRefresher, RefresherHandle};
pub use sim::SimulatedSource;
pub use source::{FetchError, TelemetrySource};
