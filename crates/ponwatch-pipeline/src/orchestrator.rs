//! Per-request pipeline orchestration.
//!
//! Each query drives one pass of the linear state machine
//! `DecidingSource → {Fetching, CacheHit} → Structuring → Evaluating →
//! Verifying → Publishing → Done`. No state is revisited; concurrent
//! requests run the machine independently and meet only at the cache,
//! whose put contract makes the final write atomic per key.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use ponwatch_cache::{CacheStore, SessionKey, Tier, TierKind};
use ponwatch_compliance::{
    compose_report, evaluate, structure_record, verify, RawRecord,
};
use ponwatch_core::{
    ComplianceFinding, DeviceScope, MetricSnapshot, OnuId, PipelineConfig, ThresholdConfig,
    VerifiedReport,
};

use crate::source::{FetchError, TelemetrySource};

/// States of the per-request machine, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DecidingSource,
    Fetching,
    CacheHit,
    Structuring,
    Evaluating,
    Verifying,
    Publishing,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DecidingSource => "deciding_source",
            Self::Fetching => "fetching",
            Self::CacheHit => "cache_hit",
            Self::Structuring => "structuring",
            Self::Evaluating => "evaluating",
            Self::Verifying => "verifying",
            Self::Publishing => "publishing",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Result of one query.
///
/// A fetch failure never becomes an empty success: it either falls back
/// to the best available cache entry, explicitly marked stale, or it is
/// surfaced as `NoData`.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// Newly computed this request and published to both tiers.
    Fresh(VerifiedReport),
    /// Served from cache within the tier's max-age.
    Cached {
        report: VerifiedReport,
        tier: TierKind,
        age: Duration,
    },
    /// Fetch failed; serving the freshest entry past its max-age.
    Stale {
        report: VerifiedReport,
        tier: TierKind,
        age: Duration,
        error: FetchError,
    },
    /// Fetch failed and no cache entry exists for the scope.
    NoData(FetchError),
}

impl QueryOutcome {
    /// The report carried by this outcome, when there is one.
    pub fn report(&self) -> Option<&VerifiedReport> {
        match self {
            Self::Fresh(report)
            | Self::Cached { report, .. }
            | Self::Stale { report, .. } => Some(report),
            Self::NoData(_) => None,
        }
    }
}

/// The telemetry compliance pipeline: the single public entry point for
/// the dialog and visualization collaborators.
pub struct Pipeline {
    source: Arc<dyn TelemetrySource>,
    cache: Arc<CacheStore>,
    thresholds: Arc<ThresholdConfig>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("thresholds", &self.thresholds)
            .field("config", &self.config)
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        cache: Arc<CacheStore>,
        thresholds: Arc<ThresholdConfig>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            cache,
            thresholds,
            config,
        }
    }

    /// The shared cache store.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Run one request through the state machine.
    ///
    /// `force_fresh` bypasses both cache tiers unconditionally; the
    /// freshly computed report is still published to both afterwards.
    #[instrument(skip(self), fields(%session, %scope, force_fresh))]
    pub async fn query(
        &self,
        session: &SessionKey,
        scope: DeviceScope,
        force_fresh: bool,
    ) -> QueryOutcome {
        debug!(stage = %Stage::DecidingSource, "query started");

        if !force_fresh {
            if let Some((report, tier, age)) = self.cache.lookup_cascade(
                session,
                &scope,
                self.config.session_max_age,
                self.config.refresh_interval,
            ) {
                debug!(stage = %Stage::CacheHit, %tier, ?age, "serving cached report");
                return QueryOutcome::Cached { report, tier, age };
            }
        }

        debug!(stage = %Stage::Fetching, "fetching raw telemetry");
        let records = match self.fetch(&scope).await {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "fetch failed");
                return match self.cache.lookup_any(session, &scope) {
                    Some((report, tier, age)) => {
                        info!(%tier, ?age, "serving stale cache entry after fetch failure");
                        QueryOutcome::Stale {
                            report,
                            tier,
                            age,
                            error,
                        }
                    }
                    None => QueryOutcome::NoData(error),
                };
            }
        };

        let report = run_evaluation_cycle(
            &records,
            scope.clone(),
            &self.thresholds,
            self.config.history_depth,
        );

        debug!(stage = %Stage::Publishing, report_id = %report.report_id, "publishing to both tiers");
        self.cache.publish(session, &scope, &report);

        debug!(stage = %Stage::Done, "query complete");
        QueryOutcome::Fresh(report)
    }

    /// Explicit cache bust for a scope, both tiers. Used by the
    /// scenario-injection features.
    pub fn invalidate(&self, session: &SessionKey, scope: &DeviceScope) {
        self.cache.invalidate(Tier::Session(session), scope);
        self.cache.invalidate(Tier::Background, scope);
    }

    async fn fetch(&self, scope: &DeviceScope) -> Result<Vec<RawRecord>, FetchError> {
        match timeout(
            self.config.fetch_timeout,
            self.source.fetch_raw_records(scope),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.config.fetch_timeout)),
        }
    }
}

/// One device's pass through structure → evaluate → verify.
#[derive(Debug, Clone)]
pub(crate) struct DeviceCycle {
    pub(crate) onu: OnuId,
    pub(crate) history: Vec<MetricSnapshot>,
    pub(crate) findings: Vec<ComplianceFinding>,
    pub(crate) inconsistencies: Vec<String>,
}

/// Structure, evaluate and verify a raw batch, per device.
///
/// A malformed record skips only its own device; the rest of the batch
/// continues and the skipped ids are reported to the caller. Only the
/// latest retained snapshot per device is evaluated; older ones are
/// history for trend consumers.
pub(crate) fn run_device_cycles(
    records: &[RawRecord],
    scope: &DeviceScope,
    thresholds: &ThresholdConfig,
    history_depth: usize,
) -> (Vec<DeviceCycle>, Vec<OnuId>) {
    debug!(stage = %Stage::Structuring, records = records.len(), "structuring raw batch");

    let mut histories: BTreeMap<OnuId, Vec<MetricSnapshot>> = BTreeMap::new();
    let mut skipped: Vec<OnuId> = Vec::new();
    for raw in records {
        match structure_record(raw) {
            Ok(snapshot) => {
                if !scope.covers(&snapshot.onu) {
                    continue;
                }
                let history = histories.entry(snapshot.onu.clone()).or_default();
                history.push(snapshot);
                if history.len() > history_depth {
                    history.remove(0);
                }
            }
            Err(err) => {
                warn!(%err, "skipping malformed record");
                if let Some(onu) = err.onu {
                    if !skipped.contains(&onu) {
                        skipped.push(onu);
                    }
                }
            }
        }
    }
    // A device whose every record was malformed stays skipped; one good
    // record is enough to keep it in the cycle.
    skipped.retain(|onu| !histories.contains_key(onu));

    debug!(stage = %Stage::Evaluating, devices = histories.len(), "evaluating latest snapshots");
    let mut cycles = Vec::with_capacity(histories.len());
    for (onu, history) in histories {
        let latest = match history.last() {
            Some(snapshot) => snapshot.clone(),
            None => continue,
        };
        let findings = evaluate(&latest, thresholds);

        debug!(stage = %Stage::Verifying, %onu, findings = findings.len(), "verifying findings");
        let verdict = verify(&latest, &findings);
        cycles.push(DeviceCycle {
            onu,
            history,
            findings,
            inconsistencies: verdict.inconsistencies,
        });
    }
    (cycles, skipped)
}

/// Full non-suspending evaluation cycle over a raw batch, folded into
/// one report for the scope.
pub(crate) fn run_evaluation_cycle(
    records: &[RawRecord],
    scope: DeviceScope,
    thresholds: &ThresholdConfig,
    history_depth: usize,
) -> VerifiedReport {
    let (cycles, skipped) = run_device_cycles(records, &scope, thresholds, history_depth);

    let mut findings = Vec::new();
    let mut inconsistencies = Vec::new();
    let mut history = BTreeMap::new();
    for cycle in cycles {
        findings.extend(cycle.findings);
        inconsistencies.extend(cycle.inconsistencies);
        history.insert(cycle.onu, cycle.history);
    }
    compose_report(scope, findings, inconsistencies, skipped, history)
}
