//! Compliance findings, the rule table and verified reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::snapshot::MetricSnapshot;
use crate::types::{DeviceScope, Health, OnuId, Severity};

/// The fixed rule table applied by the evaluator.
///
/// Threshold *values* come from [`crate::ThresholdConfig`]; the rule's
/// dimension, severity and comparison direction are intrinsic and shared
/// with the verifier's cross-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    /// RX power below the receiver sensitivity floor.
    RxPowerFloor,
    /// RX power approaching the sensitivity floor.
    RxPowerLow,
    /// SNR below the decodability floor.
    SnrFloor,
    /// SNR marginal.
    SnrLow,
    /// Post-FEC BER above the residual-error bound.
    BerPostFec,
    /// Pre-FEC BER beyond what FEC can be expected to correct.
    BerPreFecMax,
    /// Pre-FEC BER above nominal.
    BerPreFec,
    /// Transceiver temperature above the operating ceiling.
    TemperatureHigh,
    /// DSP adaptation failed.
    DspFailed,
    /// DSP adaptation struggling.
    DspAdapting,
    /// Link operationally down.
    OperDown,
    /// Link operationally degraded.
    OperDegraded,
}

impl RuleId {
    /// Every rule, in the deterministic order the evaluator walks them.
    pub const ALL: &'static [RuleId] = &[
        RuleId::RxPowerFloor,
        RuleId::RxPowerLow,
        RuleId::SnrFloor,
        RuleId::SnrLow,
        RuleId::BerPostFec,
        RuleId::BerPreFecMax,
        RuleId::BerPreFec,
        RuleId::TemperatureHigh,
        RuleId::DspFailed,
        RuleId::DspAdapting,
        RuleId::OperDown,
        RuleId::OperDegraded,
    ];

    /// Stable string id, used as the configuration key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RxPowerFloor => "rx-power-floor",
            Self::RxPowerLow => "rx-power-low",
            Self::SnrFloor => "snr-floor",
            Self::SnrLow => "snr-low",
            Self::BerPostFec => "ber-post-fec",
            Self::BerPreFecMax => "ber-pre-fec-max",
            Self::BerPreFec => "ber-pre-fec",
            Self::TemperatureHigh => "temperature-high",
            Self::DspFailed => "dsp-failed",
            Self::DspAdapting => "dsp-adapting",
            Self::OperDown => "oper-down",
            Self::OperDegraded => "oper-degraded",
        }
    }

    /// The metric dimension this rule constrains.
    pub fn dimension(&self) -> MetricDimension {
        match self {
            Self::RxPowerFloor | Self::RxPowerLow => MetricDimension::RxPower,
            Self::SnrFloor | Self::SnrLow => MetricDimension::Snr,
            Self::BerPostFec => MetricDimension::BerPostFec,
            Self::BerPreFecMax | Self::BerPreFec => MetricDimension::BerPreFec,
            Self::TemperatureHigh => MetricDimension::Temperature,
            Self::DspFailed | Self::DspAdapting => MetricDimension::Dsp,
            Self::OperDown | Self::OperDegraded => MetricDimension::OperState,
        }
    }

    /// Severity assigned when the rule fires.
    pub fn severity(&self) -> Severity {
        match self {
            Self::RxPowerFloor
            | Self::SnrFloor
            | Self::BerPostFec
            | Self::BerPreFecMax
            | Self::DspFailed
            | Self::OperDown => Severity::Critical,
            Self::RxPowerLow
            | Self::SnrLow
            | Self::BerPreFec
            | Self::TemperatureHigh
            | Self::DspAdapting
            | Self::OperDegraded => Severity::Warning,
        }
    }

    /// How the measured value relates to the threshold when the rule fires.
    pub fn comparison(&self) -> Comparison {
        match self {
            Self::RxPowerFloor | Self::RxPowerLow | Self::SnrFloor | Self::SnrLow => {
                Comparison::Below
            }
            Self::BerPostFec | Self::BerPreFecMax | Self::BerPreFec | Self::TemperatureHigh => {
                Comparison::Above
            }
            Self::DspFailed | Self::DspAdapting | Self::OperDown | Self::OperDegraded => {
                Comparison::StateEquals
            }
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuleId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or(())
    }
}

/// Metric dimensions; at most one finding is reported per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDimension {
    RxPower,
    Snr,
    BerPreFec,
    BerPostFec,
    Temperature,
    Dsp,
    OperState,
}

/// Direction of a rule's threshold comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Fires when measured < threshold.
    Below,
    /// Fires when measured > threshold.
    Above,
    /// Fires when a state field equals the named state.
    StateEquals,
}

/// A measured or threshold value attached to a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FindingValue {
    /// A numeric metric in the rule's declared unit.
    Numeric(f64),
    /// A state-valued metric rendered as its wire string.
    State(String),
}

impl std::fmt::Display for FindingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::State(s) => write!(f, "{s}"),
        }
    }
}

/// One rule violation on one device.
///
/// Produced only by the evaluator; read-only downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    /// Device the finding applies to.
    pub onu: OnuId,
    /// Rule that fired.
    pub rule: RuleId,
    /// Dimension the rule constrains (denormalized for consumers).
    pub dimension: MetricDimension,
    /// Value observed in the snapshot.
    pub measured: FindingValue,
    /// Threshold the rule compared against.
    pub threshold: FindingValue,
    /// Severity of the violation.
    pub severity: Severity,
    /// Operator-facing explanation of the violation.
    pub rationale: String,
    /// Suggested operator actions.
    pub actions: Vec<String>,
}

/// Verification verdict over a finding sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// All consistency checks passed.
    Confirmed,
    /// At least one check failed; see the inconsistency descriptions.
    Flagged,
}

/// The unit written to the cache and returned to callers.
///
/// A flagged report is still a normal result; it carries the reasons it
/// needs caller attention instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedReport {
    /// Unique report identifier.
    pub report_id: Uuid,
    /// Devices the report covers.
    pub scope: DeviceScope,
    /// Evaluation timestamp.
    pub generated_at: DateTime<Utc>,
    /// Findings in deterministic (device, rule-table) order.
    pub findings: Vec<ComplianceFinding>,
    /// Outcome of the verification pass.
    pub verdict: Verdict,
    /// Why the report was flagged, when it was.
    pub inconsistencies: Vec<String>,
    /// Roll-up of the worst finding severity.
    pub health: Health,
    /// Devices whose raw records were unusable this cycle.
    pub skipped: Vec<OnuId>,
    /// Recent structured snapshots per device, oldest first, bounded by
    /// the configured history depth. Trend consumers read these.
    pub history: BTreeMap<OnuId, Vec<MetricSnapshot>>,
}

impl VerifiedReport {
    /// Whether any device in scope had an unusable raw record.
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Worst severity present in the findings, if any fired.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}
