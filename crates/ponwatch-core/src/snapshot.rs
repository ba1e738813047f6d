//! Structured per-device metric snapshots.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DspState, OnuId, OperState};

/// One structured telemetry sample for one ONU at one capture instant.
///
/// Immutable once created. Optional metrics were absent (or unparsable)
/// in the raw record; compliance rules skip absent metrics rather than
/// reporting them as passing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Subscriber-side device the sample belongs to.
    pub onu: OnuId,
    /// Head-end device the ONU is attached to, when reported.
    pub olt: Option<String>,
    /// Capture timestamp from the device log.
    pub captured_at: DateTime<Utc>,
    /// Received optical power in dBm.
    pub rx_power_dbm: Option<f64>,
    /// Signal-to-noise ratio in dB.
    pub snr_db: Option<f64>,
    /// Bit error rate before FEC correction.
    pub ber_pre_fec: Option<f64>,
    /// Bit error rate after FEC correction.
    pub ber_post_fec: Option<f64>,
    /// Transceiver temperature in degrees Celsius.
    pub temperature_c: Option<f64>,
    /// Receiver DSP adaptation state.
    pub dsp_state: Option<DspState>,
    /// Link operational state.
    pub oper_state: Option<OperState>,
    /// Raw alarm codes reported alongside the sample. Absent list is the
    /// empty set.
    pub alarms: BTreeSet<String>,
}

impl MetricSnapshot {
    /// A snapshot with only identity fields set; every metric absent.
    pub fn bare(onu: OnuId, captured_at: DateTime<Utc>) -> Self {
        Self {
            onu,
            olt: None,
            captured_at,
            rx_power_dbm: None,
            snr_db: None,
            ber_pre_fec: None,
            ber_post_fec: None,
            temperature_c: None,
            dsp_state: None,
            oper_state: None,
            alarms: BTreeSet::new(),
        }
    }
}
