//! Device identity, scoping and shared enums.

use serde::{Deserialize, Serialize};

/// Identifier of one Optical Network Unit as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OnuId(String);

impl OnuId {
    /// Create an ONU id from the raw feed value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OnuId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which devices a query or cache entry covers.
///
/// `All` doubles as the cache-key sentinel for whole-network reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceScope {
    /// Every ONU visible to the telemetry source.
    All,
    /// A single ONU.
    Onu(OnuId),
}

impl DeviceScope {
    /// Whether a record for `onu` falls inside this scope.
    pub fn covers(&self, onu: &OnuId) -> bool {
        match self {
            Self::All => true,
            Self::Onu(id) => id == onu,
        }
    }
}

impl std::fmt::Display for DeviceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Onu(id) => write!(f, "onu:{id}"),
        }
    }
}

/// Severity attached to a compliance finding.
///
/// Ordered so that `max()` picks the worst severity on a dimension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Within the normal operating envelope.
    Ok,
    /// Abnormal but soft; requires monitoring.
    Warning,
    /// Outside the operating envelope; requires operator action.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Receiver DSP adaptation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DspState {
    /// Adaptation converged.
    Locked,
    /// Adaptation in progress or struggling.
    Adapting,
    /// Adaptation failed.
    Failed,
}

impl std::fmt::Display for DspState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::Adapting => write!(f, "adapting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Operational state of the ONU link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    Up,
    Down,
    Degraded,
}

impl std::fmt::Display for OperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Operator-facing roll-up of a report's findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// No abnormal conditions detected.
    Normal,
    /// Warning-level findings only.
    MinorIssue,
    /// At least one critical finding.
    MajorIssue,
}

impl Health {
    /// Roll up the worst severity across a finding set.
    pub fn from_worst(worst: Option<Severity>) -> Self {
        match worst {
            Some(Severity::Critical) => Self::MajorIssue,
            Some(Severity::Warning) => Self::MinorIssue,
            Some(Severity::Ok) | None => Self::Normal,
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::MinorIssue => write!(f, "minor_issue"),
            Self::MajorIssue => write!(f, "major_issue"),
        }
    }
}
