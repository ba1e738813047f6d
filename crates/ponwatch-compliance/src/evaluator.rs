//! Threshold rule evaluation.
//!
//! `evaluate` is a pure function of the snapshot and the threshold
//! configuration: identical inputs always yield identical finding
//! sequences, in a fixed dimension order. Rules whose metric is absent
//! from the snapshot are skipped, not reported as passing. When two
//! rules constrain the same dimension (floor vs low), only the more
//! severe one is reported for that dimension.

use tracing::debug;

use ponwatch_core::{
    ComplianceFinding, DspState, FindingValue, MetricSnapshot, OperState, RuleId, ThresholdConfig,
};

/// Evaluate every applicable rule against one snapshot.
pub fn evaluate(
    snapshot: &MetricSnapshot,
    thresholds: &ThresholdConfig,
) -> Vec<ComplianceFinding> {
    let findings: Vec<ComplianceFinding> = [
        rx_power(snapshot, thresholds),
        snr(snapshot, thresholds),
        ber_post_fec(snapshot, thresholds),
        ber_pre_fec(snapshot, thresholds),
        temperature(snapshot, thresholds),
        dsp(snapshot),
        oper_state(snapshot),
    ]
    .into_iter()
    .flatten()
    .collect();

    debug!(
        onu = %snapshot.onu,
        findings = findings.len(),
        "snapshot evaluated"
    );
    findings
}

fn finding(
    snapshot: &MetricSnapshot,
    rule: RuleId,
    measured: FindingValue,
    threshold: FindingValue,
    rationale: String,
    actions: &[&str],
) -> ComplianceFinding {
    ComplianceFinding {
        onu: snapshot.onu.clone(),
        rule,
        dimension: rule.dimension(),
        measured,
        threshold,
        severity: rule.severity(),
        rationale,
        actions: actions.iter().map(|a| a.to_string()).collect(),
    }
}

fn rx_power(s: &MetricSnapshot, t: &ThresholdConfig) -> Option<ComplianceFinding> {
    let rx = s.rx_power_dbm?;
    if rx < t.rx_power_floor_dbm {
        Some(finding(
            s,
            RuleId::RxPowerFloor,
            FindingValue::Numeric(rx),
            FindingValue::Numeric(t.rx_power_floor_dbm),
            format!("received optical power {rx:.2} dBm is beyond the sensitivity threshold"),
            &[
                "Urgently inspect fiber drop and connectors.",
                "Measure optical power with OPM or perform an OTDR test.",
            ],
        ))
    } else if rx < t.rx_power_low_dbm {
        Some(finding(
            s,
            RuleId::RxPowerLow,
            FindingValue::Numeric(rx),
            FindingValue::Numeric(t.rx_power_low_dbm),
            format!("received optical power {rx:.2} dBm is near the sensitivity limit"),
            &[
                "Check the passive plant for excessive insertion loss.",
                "Continue monitoring link quality trends.",
            ],
        ))
    } else {
        None
    }
}

fn snr(s: &MetricSnapshot, t: &ThresholdConfig) -> Option<ComplianceFinding> {
    let snr = s.snr_db?;
    if snr < t.snr_floor_db {
        Some(finding(
            s,
            RuleId::SnrFloor,
            FindingValue::Numeric(snr),
            FindingValue::Numeric(t.snr_floor_db),
            format!("SNR critically low ({snr:.1} dB)"),
            &["Investigate reflections, macro-bends, or noisy transmitters."],
        ))
    } else if snr < t.snr_low_db {
        Some(finding(
            s,
            RuleId::SnrLow,
            FindingValue::Numeric(snr),
            FindingValue::Numeric(t.snr_low_db),
            format!("SNR marginal ({snr:.1} dB)"),
            &["Inspect connectors for contamination or micro-bends."],
        ))
    } else {
        None
    }
}

fn ber_post_fec(s: &MetricSnapshot, t: &ThresholdConfig) -> Option<ComplianceFinding> {
    let ber = s.ber_post_fec?;
    (ber > t.ber_post_fec_max).then(|| {
        finding(
            s,
            RuleId::BerPostFec,
            FindingValue::Numeric(ber),
            FindingValue::Numeric(t.ber_post_fec_max),
            format!("post-FEC BER {ber:.2e} exceeds the residual-error bound"),
            &[
                "Perform optical path inspection immediately.",
                "Verify laser launch conditions and ONU optics health.",
            ],
        )
    })
}

fn ber_pre_fec(s: &MetricSnapshot, t: &ThresholdConfig) -> Option<ComplianceFinding> {
    let ber = s.ber_pre_fec?;
    if ber > t.ber_pre_fec_max {
        Some(finding(
            s,
            RuleId::BerPreFecMax,
            FindingValue::Numeric(ber),
            FindingValue::Numeric(t.ber_pre_fec_max),
            format!("pre-FEC BER {ber:.2e} beyond FEC correction capability"),
            &[
                "Perform optical path inspection immediately.",
                "Verify laser launch conditions and ONU optics health.",
            ],
        ))
    } else if ber > t.ber_pre_fec_warn {
        Some(finding(
            s,
            RuleId::BerPreFec,
            FindingValue::Numeric(ber),
            FindingValue::Numeric(t.ber_pre_fec_warn),
            format!("pre-FEC BER {ber:.2e} above nominal"),
            &[
                "Check clock recovery / dispersion on long-reach PON.",
                "Monitor the BER trend over time.",
            ],
        ))
    } else {
        None
    }
}

fn temperature(s: &MetricSnapshot, t: &ThresholdConfig) -> Option<ComplianceFinding> {
    let temp = s.temperature_c?;
    (temp > t.temperature_max_c).then(|| {
        finding(
            s,
            RuleId::TemperatureHigh,
            FindingValue::Numeric(temp),
            FindingValue::Numeric(t.temperature_max_c),
            format!("high ONU temperature ({temp:.1} °C)"),
            &["Check ONU ambient conditions and ventilation."],
        )
    })
}

fn dsp(s: &MetricSnapshot) -> Option<ComplianceFinding> {
    match s.dsp_state? {
        DspState::Failed => Some(finding(
            s,
            RuleId::DspFailed,
            FindingValue::State(DspState::Failed.to_string()),
            FindingValue::State(DspState::Failed.to_string()),
            "DSP adaptation failed".to_string(),
            &["Check for unstable optical power or high dispersion."],
        )),
        DspState::Adapting => Some(finding(
            s,
            RuleId::DspAdapting,
            FindingValue::State(DspState::Adapting.to_string()),
            FindingValue::State(DspState::Adapting.to_string()),
            "DSP adaptation struggling".to_string(),
            &["Check for unstable optical power or high dispersion."],
        )),
        DspState::Locked => None,
    }
}

fn oper_state(s: &MetricSnapshot) -> Option<ComplianceFinding> {
    match s.oper_state? {
        OperState::Down => Some(finding(
            s,
            RuleId::OperDown,
            FindingValue::State(OperState::Down.to_string()),
            FindingValue::State(OperState::Down.to_string()),
            "link operationally down".to_string(),
            &[
                "Verify fiber continuity and connectors on the PON link.",
                "Inspect splitter ports/splices for excessive loss.",
            ],
        )),
        OperState::Degraded => Some(finding(
            s,
            RuleId::OperDegraded,
            FindingValue::State(OperState::Degraded.to_string()),
            FindingValue::State(OperState::Degraded.to_string()),
            "link operationally degraded".to_string(),
            &["Verify fiber continuity and connectors on the PON link."],
        )),
        OperState::Up => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ponwatch_core::{MetricDimension, OnuId, Severity};

    fn nominal() -> MetricSnapshot {
        let mut s = MetricSnapshot::bare(OnuId::new("1"), Utc::now());
        s.rx_power_dbm = Some(-22.0);
        s.snr_db = Some(24.5);
        s.ber_pre_fec = Some(2.1e-9);
        s.ber_post_fec = Some(2.1e-11);
        s.temperature_c = Some(52.0);
        s.dsp_state = Some(DspState::Locked);
        s.oper_state = Some(OperState::Up);
        s
    }

    #[test]
    fn nominal_snapshot_yields_no_findings() {
        let findings = evaluate(&nominal(), &ThresholdConfig::default());
        assert!(findings.is_empty());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut s = nominal();
        s.rx_power_dbm = Some(-29.0);
        s.snr_db = Some(13.0);
        s.temperature_c = Some(78.0);
        let t = ThresholdConfig::default();

        let first = evaluate(&s, &t);
        for _ in 0..10 {
            assert_eq!(evaluate(&s, &t), first);
        }
    }

    #[test]
    fn rx_floor_yields_exactly_one_critical() {
        let mut s = nominal();
        s.rx_power_dbm = Some(-30.0);

        let findings = evaluate(&s, &ThresholdConfig::default());
        let criticals: Vec<_> = findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .collect();
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].rule, RuleId::RxPowerFloor);
        // Floor subsumes the low-power warning on the same dimension.
        assert_eq!(
            findings
                .iter()
                .filter(|f| f.dimension == MetricDimension::RxPower)
                .count(),
            1
        );
    }

    #[test]
    fn rx_low_is_warning_never_critical() {
        let mut s = nominal();
        s.rx_power_dbm = Some(-26.0);

        let findings = evaluate(&s, &ThresholdConfig::default());
        let rx: Vec<_> = findings
            .iter()
            .filter(|f| f.dimension == MetricDimension::RxPower)
            .collect();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx[0].rule, RuleId::RxPowerLow);
        assert_eq!(rx[0].severity, Severity::Warning);
    }

    #[test]
    fn pre_fec_ber_bands_split_by_severity() {
        let t = ThresholdConfig::default();

        let mut severe = nominal();
        severe.ber_pre_fec = Some(5e-3);
        let findings = evaluate(&severe, &t);
        let pre: Vec<_> = findings
            .iter()
            .filter(|f| f.dimension == MetricDimension::BerPreFec)
            .collect();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].rule, RuleId::BerPreFecMax);
        assert_eq!(pre[0].severity, Severity::Critical);

        let mut marginal = nominal();
        marginal.ber_pre_fec = Some(5e-4);
        let findings = evaluate(&marginal, &t);
        let pre: Vec<_> = findings
            .iter()
            .filter(|f| f.dimension == MetricDimension::BerPreFec)
            .collect();
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].rule, RuleId::BerPreFec);
        assert_eq!(pre[0].severity, Severity::Warning);
    }

    #[test]
    fn absent_metric_skips_rule() {
        let mut s = nominal();
        s.snr_db = None;

        let findings = evaluate(&s, &ThresholdConfig::default());
        assert!(findings
            .iter()
            .all(|f| f.dimension != MetricDimension::Snr));
    }

    #[test]
    fn distinct_dimensions_all_retained() {
        let mut s = nominal();
        s.rx_power_dbm = Some(-30.0);
        s.snr_db = Some(11.0);
        s.temperature_c = Some(80.0);
        s.oper_state = Some(OperState::Degraded);

        let findings = evaluate(&s, &ThresholdConfig::default());
        let dims: Vec<_> = findings.iter().map(|f| f.dimension).collect();
        assert_eq!(dims.len(), 4);
        assert!(dims.contains(&MetricDimension::RxPower));
        assert!(dims.contains(&MetricDimension::Snr));
        assert!(dims.contains(&MetricDimension::Temperature));
        assert!(dims.contains(&MetricDimension::OperState));
    }

    #[test]
    fn dsp_failed_is_critical() {
        let mut s = nominal();
        s.dsp_state = Some(DspState::Failed);
        let findings = evaluate(&s, &ThresholdConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::DspFailed);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn oper_down_is_critical_degraded_is_warning() {
        let mut down = nominal();
        down.oper_state = Some(OperState::Down);
        let f = evaluate(&down, &ThresholdConfig::default());
        assert_eq!(f[0].severity, Severity::Critical);

        let mut degraded = nominal();
        degraded.oper_state = Some(OperState::Degraded);
        let f = evaluate(&degraded, &ThresholdConfig::default());
        assert_eq!(f[0].severity, Severity::Warning);
    }

    #[test]
    fn configured_thresholds_are_honored() {
        let mut s = nominal();
        s.snr_db = Some(16.0);

        let tight = ThresholdConfig {
            snr_low_db: 18.0,
            ..Default::default()
        };
        let findings = evaluate(&s, &tight);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::SnrLow);
    }
}
