//! # ponwatch-cache
//!
//! Two-tier store for [`VerifiedReport`]s:
//! - the **session tier** is private to one requester's session and
//!   carries a short, caller-supplied max-age;
//! - the **background tier** is process-wide, refreshed by the periodic
//!   refresher, with the refresh interval as its max-age.
//!
//! Freshness rules: an entry older than the lookup's max-age behaves as
//! a miss but is only removed lazily on the next write to its map.
//! Writes replace entries whole under a write lock, so a reader never
//! observes a partially updated entry and concurrent writers resolve to
//! last-write-wins per key.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use ponwatch_core::{DeviceScope, VerifiedReport};

/// Stable per-session identity supplied by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which tier an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier<'a> {
    /// The named session's private tier.
    Session(&'a SessionKey),
    /// The shared background tier.
    Background,
}

/// Tier a cached report was served from (no session borrow attached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Session,
    Background,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Background => write!(f, "background"),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    report: VerifiedReport,
    stored_at: Instant,
}

impl Entry {
    fn new(report: VerifiedReport) -> Self {
        Self {
            report,
            stored_at: Instant::now(),
        }
    }

    fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

/// The two-tier report store.
#[derive(Debug)]
pub struct CacheStore {
    /// Eviction bound for session maps.
    session_max_age: Duration,
    /// Eviction bound for the background map; equals the refresh interval.
    background_max_age: Duration,
    background: RwLock<HashMap<DeviceScope, Entry>>,
    sessions: RwLock<HashMap<SessionKey, HashMap<DeviceScope, Entry>>>,
}

impl CacheStore {
    /// Create a store with per-tier eviction bounds.
    pub fn new(session_max_age: Duration, background_max_age: Duration) -> Self {
        Self {
            session_max_age,
            background_max_age,
            background: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached report for `key` if one exists and is no older
    /// than `max_age`. An expired or absent entry is a miss, never an
    /// error.
    pub fn lookup(
        &self,
        tier: Tier<'_>,
        key: &DeviceScope,
        max_age: Duration,
    ) -> Option<VerifiedReport> {
        self.peek(tier, key, Some(max_age)).map(|(report, _)| report)
    }

    /// Session tier first, then background tier, then miss. Returns the
    /// serving tier and entry age alongside the report.
    pub fn lookup_cascade(
        &self,
        session: &SessionKey,
        key: &DeviceScope,
        session_max_age: Duration,
        background_max_age: Duration,
    ) -> Option<(VerifiedReport, TierKind, Duration)> {
        if let Some((report, age)) = self.peek(Tier::Session(session), key, Some(session_max_age)) {
            trace!(%session, %key, ?age, "session tier hit");
            return Some((report, TierKind::Session, age));
        }
        if let Some((report, age)) = self.peek(Tier::Background, key, Some(background_max_age)) {
            trace!(%key, ?age, "background tier hit");
            return Some((report, TierKind::Background, age));
        }
        trace!(%session, %key, "cache miss");
        None
    }

    /// Freshest entry for `key` in either tier regardless of age. Used
    /// for the stale-fallback path after a fetch failure.
    pub fn lookup_any(
        &self,
        session: &SessionKey,
        key: &DeviceScope,
    ) -> Option<(VerifiedReport, TierKind, Duration)> {
        let from_session = self
            .peek(Tier::Session(session), key, None)
            .map(|(r, age)| (r, TierKind::Session, age));
        let from_background = self
            .peek(Tier::Background, key, None)
            .map(|(r, age)| (r, TierKind::Background, age));
        match (from_session, from_background) {
            (Some(s), Some(b)) => Some(if s.2 <= b.2 { s } else { b }),
            (Some(s), None) => Some(s),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Overwrite `key` unconditionally; `stored_at` becomes now. Expired
    /// entries in the touched map are dropped on the way through.
    pub fn put(&self, tier: Tier<'_>, key: DeviceScope, report: VerifiedReport) {
        match tier {
            Tier::Session(session) => {
                let mut sessions = self.sessions.write().unwrap();
                let map = sessions.entry(session.clone()).or_default();
                map.retain(|_, e| e.age() <= self.session_max_age);
                map.insert(key, Entry::new(report));
            }
            Tier::Background => {
                let mut background = self.background.write().unwrap();
                background.retain(|_, e| e.age() <= self.background_max_age);
                background.insert(key, Entry::new(report));
            }
        }
        trace!("cache write");
    }

    /// Write one report into both tiers (the Publishing step).
    pub fn publish(&self, session: &SessionKey, key: &DeviceScope, report: &VerifiedReport) {
        self.put(Tier::Session(session), key.clone(), report.clone());
        self.put(Tier::Background, key.clone(), report.clone());
    }

    /// Re-arm an entry's freshness without replacing its report. Used by
    /// the refresher when a fetch confirms the cached data is still
    /// current. Returns whether the entry existed.
    pub fn touch(&self, tier: Tier<'_>, key: &DeviceScope) -> bool {
        let touched = match tier {
            Tier::Session(session) => self
                .sessions
                .write()
                .unwrap()
                .get_mut(session)
                .and_then(|map| map.get_mut(key))
                .map(|e| e.stored_at = Instant::now())
                .is_some(),
            Tier::Background => self
                .background
                .write()
                .unwrap()
                .get_mut(key)
                .map(|e| e.stored_at = Instant::now())
                .is_some(),
        };
        if touched {
            trace!(%key, "cache entry touched");
        }
        touched
    }

    /// Remove an entry immediately (scenario injection / manual refresh).
    pub fn invalidate(&self, tier: Tier<'_>, key: &DeviceScope) {
        let removed = match tier {
            Tier::Session(session) => self
                .sessions
                .write()
                .unwrap()
                .get_mut(session)
                .and_then(|map| map.remove(key))
                .is_some(),
            Tier::Background => self.background.write().unwrap().remove(key).is_some(),
        };
        if removed {
            debug!(%key, "cache entry invalidated");
        }
    }

    /// Drop everything a session owns. Called when the session ends.
    pub fn end_session(&self, session: &SessionKey) {
        if self.sessions.write().unwrap().remove(session).is_some() {
            debug!(%session, "session cache dropped");
        }
    }

    /// Number of live entries in the background tier.
    pub fn background_len(&self) -> usize {
        self.background.read().unwrap().len()
    }

    /// Number of sessions holding at least one entry.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    fn peek(
        &self,
        tier: Tier<'_>,
        key: &DeviceScope,
        max_age: Option<Duration>,
    ) -> Option<(VerifiedReport, Duration)> {
        let found = match tier {
            Tier::Session(session) => {
                let sessions = self.sessions.read().unwrap();
                sessions
                    .get(session)
                    .and_then(|map| map.get(key))
                    .map(|e| (e.report.clone(), e.age()))
            }
            Tier::Background => {
                let background = self.background.read().unwrap();
                background.get(key).map(|e| (e.report.clone(), e.age()))
            }
        };
        let (report, age) = found?;
        match max_age {
            Some(limit) if age > limit => None,
            _ => Some((report, age)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use ponwatch_core::{Health, OnuId, Verdict, VerifiedReport};
    use uuid::Uuid;

    fn report(scope: DeviceScope) -> VerifiedReport {
        VerifiedReport {
            report_id: Uuid::new_v4(),
            scope,
            generated_at: Utc::now(),
            findings: Vec::new(),
            verdict: Verdict::Confirmed,
            inconsistencies: Vec::new(),
            health: Health::Normal,
            skipped: Vec::new(),
            history: BTreeMap::new(),
        }
    }

    fn store() -> CacheStore {
        CacheStore::new(Duration::from_secs(60), Duration::from_secs(60))
    }

    #[test]
    fn round_trip_within_max_age_is_equal() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::All;
        let written = report(key.clone());

        store.publish(&session, &key, &written);

        let read = store
            .lookup(Tier::Session(&session), &key, Duration::from_secs(60))
            .unwrap();
        assert_eq!(read, written);
        let read = store
            .lookup(Tier::Background, &key, Duration::from_secs(60))
            .unwrap();
        assert_eq!(read, written);
    }

    #[test]
    fn absent_key_is_a_plain_miss() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::Onu(OnuId::new("9"));

        assert!(store
            .lookup(Tier::Background, &key, Duration::from_secs(60))
            .is_none());
        assert!(store
            .lookup(Tier::Session(&session), &key, Duration::from_secs(60))
            .is_none());
        assert!(store
            .lookup_cascade(&session, &key, Duration::from_secs(60), Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn touch_re_arms_freshness_without_replacing() {
        let store = store();
        let key = DeviceScope::All;
        let written = report(key.clone());
        store.put(Tier::Background, key.clone(), written.clone());

        std::thread::sleep(Duration::from_millis(5));
        assert!(store.touch(Tier::Background, &key));

        // Entry is fresh again relative to a bound the sleep crossed,
        // and the report itself is unchanged.
        let read = store
            .lookup(Tier::Background, &key, Duration::from_millis(4))
            .unwrap();
        assert_eq!(read.report_id, written.report_id);

        // Touching an absent key reports false.
        assert!(!store.touch(Tier::Background, &DeviceScope::Onu(OnuId::new("7"))));
    }

    #[test]
    fn expired_entry_is_a_miss_not_an_error() {
        let store = store();
        let key = DeviceScope::Onu(OnuId::new("1"));
        store.put(Tier::Background, key.clone(), report(key.clone()));

        std::thread::sleep(Duration::from_millis(5));
        assert!(store.lookup(Tier::Background, &key, Duration::ZERO).is_none());
        // Still present; eviction is lazy.
        assert_eq!(store.background_len(), 1);
    }

    #[test]
    fn lazy_eviction_happens_on_next_write() {
        let store = CacheStore::new(Duration::from_millis(1), Duration::from_millis(1));
        let stale_key = DeviceScope::Onu(OnuId::new("1"));
        store.put(Tier::Background, stale_key.clone(), report(stale_key.clone()));

        std::thread::sleep(Duration::from_millis(10));
        let fresh_key = DeviceScope::Onu(OnuId::new("2"));
        store.put(Tier::Background, fresh_key.clone(), report(fresh_key.clone()));

        assert_eq!(store.background_len(), 1);
        assert!(store.lookup(Tier::Background, &stale_key, Duration::from_secs(60)).is_none());
    }

    #[test]
    fn last_write_wins() {
        let store = store();
        let key = DeviceScope::All;
        let first = report(key.clone());
        let second = report(key.clone());
        store.put(Tier::Background, key.clone(), first);
        store.put(Tier::Background, key.clone(), second.clone());

        let read = store
            .lookup(Tier::Background, &key, Duration::from_secs(60))
            .unwrap();
        assert_eq!(read.report_id, second.report_id);
    }

    #[test]
    fn cascade_prefers_session_tier() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::All;
        let session_report = report(key.clone());
        let background_report = report(key.clone());

        store.put(Tier::Background, key.clone(), background_report.clone());
        store.put(Tier::Session(&session), key.clone(), session_report.clone());

        let (served, tier, _) = store
            .lookup_cascade(&session, &key, Duration::from_secs(60), Duration::from_secs(60))
            .unwrap();
        assert_eq!(tier, TierKind::Session);
        assert_eq!(served.report_id, session_report.report_id);
    }

    #[test]
    fn invalidated_session_entry_falls_back_to_background() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::All;
        let published = report(key.clone());
        store.publish(&session, &key, &published);

        store.invalidate(Tier::Session(&session), &key);

        let (_, tier, _) = store
            .lookup_cascade(&session, &key, Duration::from_secs(60), Duration::from_secs(60))
            .unwrap();
        assert_eq!(tier, TierKind::Background);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = store();
        let alice = SessionKey::new("alice");
        let bob = SessionKey::new("bob");
        let key = DeviceScope::All;
        store.put(Tier::Session(&alice), key.clone(), report(key.clone()));

        assert!(store
            .lookup(Tier::Session(&bob), &key, Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn end_session_drops_private_entries() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::All;
        store.put(Tier::Session(&session), key.clone(), report(key.clone()));
        assert_eq!(store.session_count(), 1);

        store.end_session(&session);
        assert_eq!(store.session_count(), 0);
        assert!(store
            .lookup(Tier::Session(&session), &key, Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn lookup_any_serves_stale_entries() {
        let store = store();
        let session = SessionKey::new("s1");
        let key = DeviceScope::All;
        store.put(Tier::Background, key.clone(), report(key.clone()));

        std::thread::sleep(Duration::from_millis(5));
        // Fresh lookup misses, stale fallback still serves.
        assert!(store
            .lookup_cascade(&session, &key, Duration::ZERO, Duration::ZERO)
            .is_none());
        let (_, tier, age) = store.lookup_any(&session, &key).unwrap();
        assert_eq!(tier, TierKind::Background);
        assert!(age >= Duration::from_millis(5));
    }
}
