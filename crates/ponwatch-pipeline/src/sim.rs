//! Simulated multi-ONU telemetry feed.
//!
//! Stands in for the real NETCONF collaborator in demos and tests:
//! each simulated ONU random-walks its optics within clamped ranges,
//! BER is derived from SNR, and roughly one sample in twenty degrades
//! spontaneously. Scenario injection pins a device to a known degraded
//! or healthy profile until re-pinned, for exercising the cache-bust
//! and compliance paths end to end.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use tracing::info;

use ponwatch_compliance::RawRecord;
use ponwatch_core::{DeviceScope, OnuId};

use crate::source::{FetchError, TelemetrySource};

/// Forced per-ONU scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Degraded,
    Healthy,
}

#[derive(Debug, Clone)]
struct OnuSim {
    rx_power: f64,
    snr: f64,
    temp: f64,
    scenario: Option<Scenario>,
}

/// A drifting simulated telemetry source.
#[derive(Debug)]
pub struct SimulatedSource {
    olt_id: String,
    state: Mutex<BTreeMap<u32, OnuSim>>,
}

impl SimulatedSource {
    /// Create a feed with ONU ids `1..=num_onus`.
    pub fn new(olt_id: impl Into<String>, num_onus: u32) -> Self {
        let mut rng = rand::thread_rng();
        let state = (1..=num_onus)
            .map(|id| {
                (
                    id,
                    OnuSim {
                        rx_power: -23.0 + rng.gen_range(-2.0..2.0),
                        snr: 22.0 + rng.gen_range(-3.0..3.0),
                        temp: 55.0 + rng.gen_range(-5.0..5.0),
                        scenario: None,
                    },
                )
            })
            .collect();
        Self {
            olt_id: olt_id.into(),
            state: Mutex::new(state),
        }
    }

    /// Pin an ONU to a degraded signal profile.
    pub fn inject_degraded(&self, onu: u32) {
        self.set_scenario(onu, Scenario::Degraded);
        info!(onu, "injected degraded signal scenario");
    }

    /// Pin an ONU back to a healthy signal profile.
    pub fn inject_normal(&self, onu: u32) {
        self.set_scenario(onu, Scenario::Healthy);
        info!(onu, "injected healthy signal scenario");
    }

    fn set_scenario(&self, onu: u32, scenario: Scenario) {
        let mut state = self.state.lock().unwrap();
        if let Some(sim) = state.get_mut(&onu) {
            sim.scenario = Some(scenario);
        }
    }

    fn record_for(&self, onu: u32, sim: &mut OnuSim, ts: &str) -> RawRecord {
        let mut rng = rand::thread_rng();

        let (rx, snr, ber_pre, ber_post, temp, alarms, dsp) = match sim.scenario {
            Some(Scenario::Degraded) => (
                -29.5,
                12.3,
                5.2e-5,
                5.2e-7,
                78.2,
                Some("qot-degrade"),
                "slow",
            ),
            Some(Scenario::Healthy) => (-22.0, 24.5, 2.1e-9, 2.1e-11, 52.0, None, "normal"),
            None => {
                // Smooth drift within clamped operating ranges.
                sim.rx_power = (sim.rx_power + rng.gen_range(-0.2..0.2)).clamp(-30.0, -15.0);
                sim.snr = (sim.snr + rng.gen_range(-0.5..0.5)).clamp(10.0, 30.0);
                sim.temp = (sim.temp + rng.gen_range(-0.2..0.2)).clamp(40.0, 80.0);

                let mut degrade = false;
                let mut dsp_slow = false;
                if rng.gen_bool(0.05) {
                    sim.rx_power -= rng.gen_range(1.0..3.0);
                    sim.snr -= rng.gen_range(2.0..5.0);
                    sim.temp += rng.gen_range(1.0..3.0);
                    degrade = true;
                    dsp_slow = rng.gen_bool(0.5);
                }

                let ber_pre = 10f64.powf(-sim.snr / 5.0);
                (
                    sim.rx_power,
                    sim.snr,
                    ber_pre,
                    ber_pre / 100.0,
                    sim.temp,
                    degrade.then_some("qot-degrade"),
                    if dsp_slow { "slow" } else { "normal" },
                )
            }
        };

        let mut record = RawRecord::new();
        record.insert("event-time".to_string(), ts.to_string());
        record.insert("olt-id".to_string(), self.olt_id.clone());
        record.insert("onu-id".to_string(), onu.to_string());
        record.insert("rx-power".to_string(), format!("{rx:.2}"));
        record.insert("snr".to_string(), format!("{snr:.2}"));
        record.insert("ber-pre-fec".to_string(), format!("{ber_pre:.2e}"));
        record.insert("ber-post-fec".to_string(), format!("{ber_post:.2e}"));
        record.insert("temperature".to_string(), format!("{temp:.1}"));
        record.insert("dsp-adaptation".to_string(), dsp.to_string());
        if let Some(alarm) = alarms {
            record.insert("alarms".to_string(), alarm.to_string());
        }
        record
    }
}

#[async_trait]
impl TelemetrySource for SimulatedSource {
    async fn fetch_raw_records(&self, scope: &DeviceScope) -> Result<Vec<RawRecord>, FetchError> {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut state = self.state.lock().unwrap();
        let records = state
            .iter_mut()
            .filter(|(id, _)| scope.covers(&OnuId::new(id.to_string())))
            .map(|(id, sim)| self.record_for(*id, sim, &ts))
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponwatch_compliance::structure_record;
    use ponwatch_core::{DspState, OnuId};

    #[tokio::test]
    async fn emits_one_record_per_onu_in_scope() {
        let source = SimulatedSource::new("OLT-01", 4);

        let all = source.fetch_raw_records(&DeviceScope::All).await.unwrap();
        assert_eq!(all.len(), 4);

        let one = source
            .fetch_raw_records(&DeviceScope::Onu(OnuId::new("2")))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].get("onu-id").unwrap(), "2");
    }

    #[tokio::test]
    async fn records_structure_cleanly() {
        let source = SimulatedSource::new("OLT-01", 2);
        let records = source.fetch_raw_records(&DeviceScope::All).await.unwrap();
        for raw in &records {
            let snapshot = structure_record(raw).unwrap();
            assert!(snapshot.rx_power_dbm.is_some());
            assert!(snapshot.snr_db.is_some());
            assert_eq!(snapshot.olt.as_deref(), Some("OLT-01"));
        }
    }

    #[tokio::test]
    async fn injected_degradation_shows_in_records() {
        let source = SimulatedSource::new("OLT-01", 2);
        source.inject_degraded(1);

        let records = source
            .fetch_raw_records(&DeviceScope::Onu(OnuId::new("1")))
            .await
            .unwrap();
        let snapshot = structure_record(&records[0]).unwrap();
        assert_eq!(snapshot.rx_power_dbm, Some(-29.5));
        assert_eq!(snapshot.dsp_state, Some(DspState::Adapting));
        assert!(snapshot.alarms.contains("qot-degrade"));

        source.inject_normal(1);
        let records = source
            .fetch_raw_records(&DeviceScope::Onu(OnuId::new("1")))
            .await
            .unwrap();
        let snapshot = structure_record(&records[0]).unwrap();
        assert_eq!(snapshot.rx_power_dbm, Some(-22.0));
        assert!(snapshot.alarms.is_empty());
    }
}
