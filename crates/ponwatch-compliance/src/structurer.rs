//! Raw record structuring.
//!
//! The wire decoder (an external collaborator) hands this module
//! already-tokenized key/value fields per device record. Structuring
//! coerces every recognized field to its declared unit and type and
//! fills documented defaults for anything absent or unparsable; only a
//! missing identity field is fatal, and then only for that one device's
//! cycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::trace;

use ponwatch_core::{DspState, MetricSnapshot, OnuId, OperState};

/// Already-tokenized telemetry fields for one device record.
///
/// Keys follow the device log's tag names (`onu-id`, `rx-power`,
/// `ber-pre-fec`, ...). A `BTreeMap` keeps iteration deterministic.
pub type RawRecord = BTreeMap<String, String>;

/// A raw record unusable for structuring.
///
/// Raised only when a required identity field is missing or unparsable;
/// the batch continues with the remaining devices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed record (onu {}): {reason}", .onu.as_ref().map(OnuId::as_str).unwrap_or("unknown"))]
pub struct MalformedRecord {
    /// Device id, when at least that much was readable.
    pub onu: Option<OnuId>,
    /// What made the record unusable.
    pub reason: String,
}

/// Field names recognized by the structurer.
mod field {
    pub(super) const ONU_ID: &str = "onu-id";
    pub(super) const OLT_ID: &str = "olt-id";
    pub(super) const EVENT_TIME: &str = "event-time";
    pub(super) const RX_POWER: &str = "rx-power";
    pub(super) const SNR: &str = "snr";
    pub(super) const BER_PRE_FEC: &str = "ber-pre-fec";
    pub(super) const BER_POST_FEC: &str = "ber-post-fec";
    pub(super) const TEMPERATURE: &str = "temperature";
    pub(super) const DSP_ADAPTATION: &str = "dsp-adaptation";
    pub(super) const OPER_STATE: &str = "oper-state";
    pub(super) const ALARMS: &str = "alarms";
}

/// Convert one raw record into a typed snapshot.
pub fn structure_record(raw: &RawRecord) -> Result<MetricSnapshot, MalformedRecord> {
    let onu = match raw.get(field::ONU_ID).map(|s| s.trim()) {
        Some(id) if !id.is_empty() => OnuId::new(id),
        _ => {
            return Err(MalformedRecord {
                onu: None,
                reason: "missing onu-id".to_string(),
            })
        }
    };

    let captured_at = match raw.get(field::EVENT_TIME) {
        Some(ts) => ts
            .trim()
            .parse::<DateTime<Utc>>()
            .map_err(|e| MalformedRecord {
                onu: Some(onu.clone()),
                reason: format!("unparsable event-time {ts:?}: {e}"),
            })?,
        None => {
            return Err(MalformedRecord {
                onu: Some(onu),
                reason: "missing event-time".to_string(),
            })
        }
    };

    let mut snapshot = MetricSnapshot::bare(onu, captured_at);
    snapshot.olt = raw
        .get(field::OLT_ID)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    snapshot.rx_power_dbm = numeric(raw, field::RX_POWER);
    snapshot.snr_db = numeric(raw, field::SNR);
    snapshot.ber_pre_fec = numeric(raw, field::BER_PRE_FEC);
    snapshot.ber_post_fec = numeric(raw, field::BER_POST_FEC);
    snapshot.temperature_c = numeric(raw, field::TEMPERATURE);
    snapshot.dsp_state = raw.get(field::DSP_ADAPTATION).and_then(|s| dsp_state(s));
    snapshot.oper_state = raw.get(field::OPER_STATE).and_then(|s| oper_state(s));
    snapshot.alarms = raw
        .get(field::ALARMS)
        .map(|codes| {
            codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    trace!(onu = %snapshot.onu, captured_at = %snapshot.captured_at, "record structured");
    Ok(snapshot)
}

/// Parse a numeric field; unparsable values fall back to absent.
fn numeric(raw: &RawRecord, key: &str) -> Option<f64> {
    raw.get(key)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Map the feed's DSP vocabulary onto the typed state.
///
/// The generator-era feed says `normal`/`slow`; newer firmware says
/// `locked`/`adapting`/`failed`. Unknown values are treated as absent.
fn dsp_state(value: &str) -> Option<DspState> {
    match value.trim().to_ascii_lowercase().as_str() {
        "locked" | "normal" => Some(DspState::Locked),
        "adapting" | "slow" | "tracking" | "degraded" => Some(DspState::Adapting),
        "failed" => Some(DspState::Failed),
        _ => None,
    }
}

fn oper_state(value: &str) -> Option<OperState> {
    match value.trim().to_ascii_lowercase().as_str() {
        "up" => Some(OperState::Up),
        "down" => Some(OperState::Down),
        "degraded" => Some(OperState::Degraded),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> RawRecord {
        let mut raw = RawRecord::new();
        raw.insert("onu-id".to_string(), "2".to_string());
        raw.insert("olt-id".to_string(), "OLT-01".to_string());
        raw.insert(
            "event-time".to_string(),
            "2026-08-26T10:00:00.000Z".to_string(),
        );
        raw.insert("rx-power".to_string(), "-22.0".to_string());
        raw.insert("snr".to_string(), "24.5".to_string());
        raw.insert("ber-pre-fec".to_string(), "2.1e-09".to_string());
        raw.insert("ber-post-fec".to_string(), "2.1e-11".to_string());
        raw.insert("temperature".to_string(), "52.0".to_string());
        raw.insert("dsp-adaptation".to_string(), "normal".to_string());
        raw
    }

    #[test]
    fn full_record_structures() {
        let snapshot = structure_record(&base_record()).unwrap();
        assert_eq!(snapshot.onu, OnuId::new("2"));
        assert_eq!(snapshot.olt.as_deref(), Some("OLT-01"));
        assert_eq!(snapshot.rx_power_dbm, Some(-22.0));
        assert_eq!(snapshot.ber_pre_fec, Some(2.1e-9));
        assert_eq!(snapshot.dsp_state, Some(DspState::Locked));
        assert!(snapshot.alarms.is_empty());
    }

    #[test]
    fn absent_metrics_default_not_fail() {
        let mut raw = RawRecord::new();
        raw.insert("onu-id".to_string(), "5".to_string());
        raw.insert(
            "event-time".to_string(),
            "2026-08-26T10:00:00Z".to_string(),
        );

        let snapshot = structure_record(&raw).unwrap();
        assert!(snapshot.rx_power_dbm.is_none());
        assert!(snapshot.oper_state.is_none());
        assert!(snapshot.alarms.is_empty());
    }

    #[test]
    fn unparsable_metric_is_absent_not_fatal() {
        let mut raw = base_record();
        raw.insert("rx-power".to_string(), "n/a".to_string());
        raw.insert("temperature".to_string(), "NaN".to_string());

        let snapshot = structure_record(&raw).unwrap();
        assert!(snapshot.rx_power_dbm.is_none());
        assert!(snapshot.temperature_c.is_none());
    }

    #[test]
    fn missing_onu_id_is_malformed() {
        let mut raw = base_record();
        raw.remove("onu-id");
        let err = structure_record(&raw).unwrap_err();
        assert!(err.onu.is_none());
        assert!(err.reason.contains("onu-id"));
    }

    #[test]
    fn missing_event_time_is_malformed() {
        let mut raw = base_record();
        raw.remove("event-time");
        let err = structure_record(&raw).unwrap_err();
        assert_eq!(err.onu, Some(OnuId::new("2")));
    }

    #[test]
    fn unparsable_event_time_is_malformed() {
        let mut raw = base_record();
        raw.insert("event-time".to_string(), "yesterday".to_string());
        assert!(structure_record(&raw).is_err());
    }

    #[test]
    fn alarm_list_splits_on_commas() {
        let mut raw = base_record();
        raw.insert(
            "alarms".to_string(),
            "qot-degrade, los,  ".to_string(),
        );
        let snapshot = structure_record(&raw).unwrap();
        assert_eq!(snapshot.alarms.len(), 2);
        assert!(snapshot.alarms.contains("qot-degrade"));
        assert!(snapshot.alarms.contains("los"));
    }

    #[test]
    fn legacy_dsp_vocabulary_maps() {
        for (wire, expected) in [
            ("slow", DspState::Adapting),
            ("tracking", DspState::Adapting),
            ("failed", DspState::Failed),
            ("locked", DspState::Locked),
        ] {
            let mut raw = base_record();
            raw.insert("dsp-adaptation".to_string(), wire.to_string());
            let snapshot = structure_record(&raw).unwrap();
            assert_eq!(snapshot.dsp_state, Some(expected), "wire value {wire}");
        }

        let mut raw = base_record();
        raw.insert("dsp-adaptation".to_string(), "warp-speed".to_string());
        assert!(structure_record(&raw).unwrap().dsp_state.is_none());
    }
}
