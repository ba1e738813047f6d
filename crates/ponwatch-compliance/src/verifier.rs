//! Reflection verification.
//!
//! Re-checks the evaluator's output for internal consistency before a
//! report is released. This pass performs no threshold logic of its own:
//! it only cross-checks findings against the rule table's declared
//! comparison directions and against the source snapshot. A flagged
//! result is still returned to the caller, marked distinctly, never
//! dropped.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use ponwatch_core::{
    ComplianceFinding, Comparison, DeviceScope, FindingValue, Health, MetricDimension,
    MetricSnapshot, OnuId, RuleId, Severity, Verdict, VerifiedReport,
};

/// Outcome of verifying one device's finding sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVerdict {
    /// Confirmed when every check passed.
    pub verdict: Verdict,
    /// One description per violated check.
    pub inconsistencies: Vec<String>,
}

impl DeviceVerdict {
    fn confirmed() -> Self {
        Self {
            verdict: Verdict::Confirmed,
            inconsistencies: Vec::new(),
        }
    }
}

/// Cross-check one device's findings against its source snapshot.
pub fn verify(snapshot: &MetricSnapshot, findings: &[ComplianceFinding]) -> DeviceVerdict {
    let mut out = DeviceVerdict::confirmed();

    check_critical_violations(findings, &mut out);
    check_dimension_conflicts(findings, &mut out);
    check_alarm_consistency(snapshot, findings, &mut out);

    if !out.inconsistencies.is_empty() {
        out.verdict = Verdict::Flagged;
        warn!(
            onu = %snapshot.onu,
            inconsistencies = out.inconsistencies.len(),
            "verification flagged a finding sequence"
        );
    }
    out
}

/// Check 1: every critical finding's measured value must actually violate
/// its stated threshold in the rule's declared direction. Guards against
/// rule/threshold drift between evaluator versions and configuration.
fn check_critical_violations(findings: &[ComplianceFinding], out: &mut DeviceVerdict) {
    for f in findings.iter().filter(|f| f.severity == Severity::Critical) {
        let violates = match (&f.measured, &f.threshold, f.rule.comparison()) {
            (FindingValue::Numeric(m), FindingValue::Numeric(t), Comparison::Below) => m < t,
            (FindingValue::Numeric(m), FindingValue::Numeric(t), Comparison::Above) => m > t,
            (FindingValue::State(m), FindingValue::State(t), Comparison::StateEquals) => m == t,
            // Value kinds disagree with the rule's comparison shape.
            _ => false,
        };
        if !violates {
            out.inconsistencies.push(format!(
                "critical finding {} on onu {}: measured {} does not violate threshold {}",
                f.rule, f.onu, f.measured, f.threshold
            ));
        }
    }
}

/// Check 2: at most one finding per metric dimension per device, so no
/// two findings can assign conflicting severities to the same metric.
fn check_dimension_conflicts(findings: &[ComplianceFinding], out: &mut DeviceVerdict) {
    let mut seen: Vec<(&OnuId, MetricDimension, Severity, RuleId)> = Vec::new();
    for f in findings {
        if let Some((_, _, prev_sev, prev_rule)) = seen
            .iter()
            .find(|(onu, dim, _, _)| *onu == &f.onu && *dim == f.dimension)
        {
            out.inconsistencies.push(format!(
                "onu {}: rules {} ({}) and {} ({}) both report dimension {:?}",
                f.onu, prev_rule, prev_sev, f.rule, f.severity, f.dimension
            ));
        } else {
            seen.push((&f.onu, f.dimension, f.severity, f.rule));
        }
    }
}

/// Check 3: an operationally-down finding with zero raw alarm codes is
/// suspicious; a real outage is expected to raise at least one alarm.
fn check_alarm_consistency(
    snapshot: &MetricSnapshot,
    findings: &[ComplianceFinding],
    out: &mut DeviceVerdict,
) {
    let down_reported = findings.iter().any(|f| f.rule == RuleId::OperDown);
    if down_reported && snapshot.alarms.is_empty() {
        out.inconsistencies.push(format!(
            "onu {}: operational-down finding with no raw alarm codes",
            snapshot.onu
        ));
    }
}

/// Fold per-device verification results into the report unit that is
/// cached and returned to callers.
pub fn compose_report(
    scope: DeviceScope,
    findings: Vec<ComplianceFinding>,
    inconsistencies: Vec<String>,
    skipped: Vec<OnuId>,
    history: BTreeMap<OnuId, Vec<MetricSnapshot>>,
) -> VerifiedReport {
    let verdict = if inconsistencies.is_empty() {
        Verdict::Confirmed
    } else {
        Verdict::Flagged
    };
    let health = Health::from_worst(findings.iter().map(|f| f.severity).max());
    VerifiedReport {
        report_id: Uuid::new_v4(),
        scope,
        generated_at: Utc::now(),
        findings,
        verdict,
        inconsistencies,
        health,
        skipped,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::evaluate;
    use chrono::Utc;
    use ponwatch_core::{DspState, OperState, ThresholdConfig};

    fn snapshot(onu: &str) -> MetricSnapshot {
        MetricSnapshot::bare(OnuId::new(onu), Utc::now())
    }

    fn numeric_finding(rule: RuleId, measured: f64, threshold: f64) -> ComplianceFinding {
        ComplianceFinding {
            onu: OnuId::new("1"),
            rule,
            dimension: rule.dimension(),
            measured: FindingValue::Numeric(measured),
            threshold: FindingValue::Numeric(threshold),
            severity: rule.severity(),
            rationale: String::new(),
            actions: Vec::new(),
        }
    }

    #[test]
    fn honest_evaluator_output_is_confirmed() {
        let mut s = snapshot("1");
        s.rx_power_dbm = Some(-30.0);
        s.snr_db = Some(11.0);
        s.alarms.insert("qot-degrade".to_string());

        let findings = evaluate(&s, &ThresholdConfig::default());
        let result = verify(&s, &findings);
        assert_eq!(result.verdict, Verdict::Confirmed);
        assert!(result.inconsistencies.is_empty());
    }

    #[test]
    fn non_violating_critical_is_flagged() {
        // Measured -20 dBm does not violate a -28 dBm floor.
        let findings = vec![numeric_finding(RuleId::RxPowerFloor, -20.0, -28.0)];
        let result = verify(&snapshot("1"), &findings);
        assert_eq!(result.verdict, Verdict::Flagged);
        assert_eq!(result.inconsistencies.len(), 1);
        assert!(result.inconsistencies[0].contains("rx-power-floor"));
    }

    #[test]
    fn duplicate_dimension_is_flagged() {
        let findings = vec![
            numeric_finding(RuleId::RxPowerFloor, -30.0, -28.0),
            numeric_finding(RuleId::RxPowerLow, -30.0, -25.0),
        ];
        let result = verify(&snapshot("1"), &findings);
        assert_eq!(result.verdict, Verdict::Flagged);
        assert!(result
            .inconsistencies
            .iter()
            .any(|d| d.contains("RxPower") || d.contains("rx-power")));
    }

    #[test]
    fn down_without_alarms_is_flagged() {
        let mut s = snapshot("2");
        s.oper_state = Some(OperState::Down);

        let findings = evaluate(&s, &ThresholdConfig::default());
        assert!(findings.iter().any(|f| f.rule == RuleId::OperDown));

        let result = verify(&s, &findings);
        assert_eq!(result.verdict, Verdict::Flagged);
        assert!(result.inconsistencies[0].contains("no raw alarm codes"));
    }

    #[test]
    fn down_with_alarms_is_confirmed() {
        let mut s = snapshot("2");
        s.oper_state = Some(OperState::Down);
        s.alarms.insert("los".to_string());

        let findings = evaluate(&s, &ThresholdConfig::default());
        let result = verify(&s, &findings);
        assert_eq!(result.verdict, Verdict::Confirmed);
    }

    #[test]
    fn state_criticals_verify_by_equality() {
        let mut s = snapshot("3");
        s.dsp_state = Some(DspState::Failed);
        s.alarms.insert("dsp-fail".to_string());

        let findings = evaluate(&s, &ThresholdConfig::default());
        let result = verify(&s, &findings);
        assert_eq!(result.verdict, Verdict::Confirmed);
    }

    #[test]
    fn compose_report_flags_on_inconsistency() {
        let report = compose_report(
            DeviceScope::All,
            vec![numeric_finding(RuleId::SnrFloor, 10.0, 12.0)],
            vec!["something odd".to_string()],
            vec![OnuId::new("9")],
            BTreeMap::new(),
        );
        assert_eq!(report.verdict, Verdict::Flagged);
        assert_eq!(report.health, Health::MajorIssue);
        assert!(report.is_partial());
    }

    #[test]
    fn compose_report_confirms_clean_findings() {
        let report =
            compose_report(DeviceScope::All, Vec::new(), Vec::new(), Vec::new(), BTreeMap::new());
        assert_eq!(report.verdict, Verdict::Confirmed);
        assert_eq!(report.health, Health::Normal);
        assert!(!report.is_partial());
        assert!(report.history.is_empty());
    }
}
