//! Claims enrichment cache.
//!
//! Adds claims from a `ClaimsSource` to an authenticated principal. Results are
//! cached per identity name until the `exp` of the token that triggered the
//! fetch, and concurrent misses for the same name share a single fetch.
//!
//! At most one source call per name runs at a time. `invalidate` does not
//! cancel a running fetch; it marks it stale, and the next miss for that name
//! waits for the stale call to finish before calling the source again.
//!
//! Locks: one `Mutex` for `in_flight` and one `RwLock` for `entries`, both
//! held for a map operation only and never across an await. `in_flight` is
//! always taken before `entries`. Expired entries are dropped when looked up,
//! and swept on insert once the map has doubled since the last sweep.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, warn};

use crate::services::{
    auth::principal::{Claim, Principal},
    claims::source::ClaimsSource,
    clock::Clock,
};

pub const EXP_CLAIM: &str = "exp";

#[cfg(not(test))]
const MIN_SWEEP_LEN: usize = 1024;
#[cfg(test)]
const MIN_SWEEP_LEN: usize = 4;

/// Enrichment failure. `Clone` so every waiter of a shared fetch gets the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnrichError {
    #[error("authenticated principal has no name")]
    MissingName,
    #[error("token 'exp' claim is missing or invalid")]
    InvalidExpiry,
    #[error("claims source '{backend}' failed: {message}")]
    Source {
        backend: &'static str,
        message: String,
    },
    #[error("claims source timed out after {0:?}")]
    Timeout(Duration),
    #[error("claims fetch aborted: {0}")]
    Aborted(String),
}

type FetchResult = Result<Arc<[Claim]>, EnrichError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

#[derive(Debug)]
struct CacheEntry {
    claims: Arc<[Claim]>,
    expires_at: DateTime<Utc>,
}

struct InFlight {
    id: u64,
    fetch: SharedFetch,
    // invalidated while running: still awaited, never joined or stored
    stale: bool,
}

enum Lookup {
    Hit(Arc<[Claim]>),
    Wait(SharedFetch),
}

struct Inner {
    source: Arc<dyn ClaimsSource>,
    clock: Arc<dyn Clock>,
    fetch_timeout: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_fetch_id: AtomicU64,
    // entry count that triggers the next expired-entry sweep
    sweep_at: AtomicUsize,
}

/// Process-wide cache; clones share state.
#[derive(Clone)]
pub struct ClaimsEnrichmentCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClaimsEnrichmentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsEnrichmentCache")
            .field("source", &self.inner.source.name())
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl ClaimsEnrichmentCache {
    pub fn new(source: Arc<dyn ClaimsSource>, clock: Arc<dyn Clock>, fetch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                fetch_timeout,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(0),
                sweep_at: AtomicUsize::new(MIN_SWEEP_LEN),
            }),
        }
    }

    /// Append the identity's additional claims to `principal`.
    ///
    /// Unauthenticated principals are left untouched. On error the principal
    /// is not modified.
    pub async fn enrich(&self, principal: &mut Principal) -> Result<(), EnrichError> {
        if !principal.is_authenticated() {
            return Ok(());
        }

        let name = principal.name().ok_or(EnrichError::MissingName)?.to_owned();

        let claims = match self.inner.lookup_or_start(&name, principal)? {
            Lookup::Hit(claims) => claims,
            Lookup::Wait(fetch) => fetch.await?,
        };

        principal.add_claims(claims.iter().cloned());
        Ok(())
    }

    /// Drop the cached claims for `identity_name`.
    ///
    /// A fetch already in flight for that name is marked stale: its waiters
    /// still get its result but it is not stored, and later callers start a
    /// new fetch queued behind it.
    pub fn invalidate(&self, identity_name: &str) {
        let mut in_flight = lock(&self.inner.in_flight);
        let detached = in_flight
            .get_mut(identity_name)
            .map(|pending| pending.stale = true)
            .is_some();
        let removed = write(&self.inner.entries).remove(identity_name).is_some();
        debug!(identity = %identity_name, removed, detached, "claims cache invalidated");
    }

    #[cfg(test)]
    fn cached_expiry(&self, identity_name: &str) -> Option<DateTime<Utc>> {
        read(&self.inner.entries)
            .get(identity_name)
            .map(|e| e.expires_at)
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        read(&self.inner.entries).len()
    }
}

impl Inner {
    fn lookup_or_start(self: &Arc<Self>, name: &str, principal: &Principal) -> Result<Lookup, EnrichError> {
        if let Some(claims) = self.fresh(name) {
            debug!(identity = %name, "claims cache hit");
            return Ok(Lookup::Hit(claims));
        }

        let mut in_flight = lock(&self.in_flight);

        // A fetch may have completed between the first check and taking the lock.
        if let Some(claims) = self.fresh(name) {
            debug!(identity = %name, "claims cache hit");
            return Ok(Lookup::Hit(claims));
        }

        let previous = match in_flight.get(name) {
            Some(pending) if !pending.stale => {
                debug!(identity = %name, fetch_id = pending.id, "joining in-flight claims fetch");
                return Ok(Lookup::Wait(pending.fetch.clone()));
            }
            Some(pending) => Some(pending.fetch.clone()),
            None => None,
        };

        let expires_at = token_expiry(principal)?;
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        debug!(identity = %name, fetch_id = id, queued = previous.is_some(), "claims cache miss, fetching");

        let fetch = self.spawn_fetch(name.to_owned(), expires_at, id, previous);
        in_flight.insert(
            name.to_owned(),
            InFlight {
                id,
                fetch: fetch.clone(),
                stale: false,
            },
        );

        Ok(Lookup::Wait(fetch))
    }

    /// Unexpired cached claims; an expired entry is evicted on sight.
    fn fresh(&self, name: &str) -> Option<Arc<[Claim]>> {
        let now = self.clock.now();
        {
            let entries = read(&self.entries);
            match entries.get(name) {
                None => return None,
                Some(entry) if now < entry.expires_at => return Some(entry.claims.clone()),
                Some(_) => {}
            }
        }

        let mut entries = write(&self.entries);
        if entries.get(name).is_some_and(|e| now >= e.expires_at) {
            entries.remove(name);
            debug!(identity = %name, "claims cache entry expired");
        }
        None
    }

    // The fetch runs on its own task so it finishes (and clears its in-flight
    // marker) even if every waiting request is dropped.
    fn spawn_fetch(
        self: &Arc<Self>,
        name: String,
        expires_at: DateTime<Utc>,
        id: u64,
        previous: Option<SharedFetch>,
    ) -> SharedFetch {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            // stale result is of no use here, only its completion
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let result = inner.fetch(&name).await;
            inner.complete(&name, id, expires_at, result)
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(EnrichError::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }

    async fn fetch(&self, name: &str) -> Result<Vec<Claim>, EnrichError> {
        let backend = self.source.name();
        let call = tokio::time::timeout(self.fetch_timeout, self.source.fetch_claims(name));

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(Ok(claims))) => Ok(claims),
            Ok(Ok(Err(e))) => Err(EnrichError::Source {
                backend,
                message: e.to_string(),
            }),
            Ok(Err(_elapsed)) => Err(EnrichError::Timeout(self.fetch_timeout)),
            Err(_panic) => Err(EnrichError::Aborted(format!("claims source '{backend}' panicked"))),
        }
    }

    fn complete(
        &self,
        name: &str,
        id: u64,
        expires_at: DateTime<Utc>,
        result: Result<Vec<Claim>, EnrichError>,
    ) -> FetchResult {
        let mut in_flight = lock(&self.in_flight);
        let (owner, current) = match in_flight.get(name) {
            Some(f) if f.id == id => (true, !f.stale),
            _ => (false, false),
        };
        if owner {
            in_flight.remove(name);
        }

        let claims: Arc<[Claim]> = match result {
            Ok(claims) => claims.into(),
            Err(err) => {
                warn!(identity = %name, fetch_id = id, error = %err, "claims fetch failed");
                return Err(err);
            }
        };

        if !current {
            debug!(identity = %name, fetch_id = id, "claims fetched after invalidation, not cached");
        } else if expires_at <= self.clock.now() {
            debug!(identity = %name, fetch_id = id, %expires_at, "token already expired, not cached");
        } else {
            let mut entries = write(&self.entries);
            self.sweep_expired(&mut entries);
            entries.insert(
                name.to_owned(),
                CacheEntry {
                    claims: claims.clone(),
                    expires_at,
                },
            );
            debug!(identity = %name, fetch_id = id, %expires_at, count = claims.len(), "claims cached");
        }

        Ok(claims)
    }

    fn sweep_expired(&self, entries: &mut HashMap<String, CacheEntry>) {
        if entries.len() < self.sweep_at.load(Ordering::Relaxed) {
            return;
        }
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        self.sweep_at
            .store((entries.len() * 2).max(MIN_SWEEP_LEN), Ordering::Relaxed);
        debug!(evicted = before - entries.len(), remaining = entries.len(), "expired claims swept");
    }
}

/// Absolute expiry from the validator-provided `exp` claim (seconds since epoch).
fn token_expiry(principal: &Principal) -> Result<DateTime<Utc>, EnrichError> {
    let raw = principal
        .find_first(EXP_CLAIM)
        .ok_or(EnrichError::InvalidExpiry)?
        .trim();

    let seconds = raw
        .parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f as i64)
        })
        .ok_or(EnrichError::InvalidExpiry)?;

    DateTime::from_timestamp(seconds, 0).ok_or(EnrichError::InvalidExpiry)
}

// The maps hold no invariant a panicking holder could break halfway.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::services::{
        auth::scheme::SchemeName,
        claims::source::ClaimsSourceError,
        clock::ManualClock,
    };

    #[derive(Debug, Default)]
    struct ScriptedSource {
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        gate: Notify,
        gated: bool,
        fail: bool,
        hang_first: bool,
    }

    impl ScriptedSource {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn max_active(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }

        async fn wait_for_calls(&self, n: usize) {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    struct Active<'a>(&'a AtomicUsize);

    impl Drop for Active<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ClaimsSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_claims(&self, _name: &str) -> Result<Vec<Claim>, ClaimsSourceError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _active = Active(&self.active);
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.hang_first && call == 1 {
                std::future::pending::<()>().await;
            }
            if self.gated {
                self.gate.notified().await;
            }
            if self.fail {
                return Err(ClaimsSourceError::InvalidPayload("backing store down".into()));
            }
            Ok(vec![
                Claim::new("role", "Administrator"),
                Claim::new("fetch", call.to_string()),
            ])
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn principal(name: &str, exp: impl ToString) -> Principal {
        Principal::authenticated(
            SchemeName::new("LocalBearer"),
            "unique_name",
            "role",
            vec![
                Claim::new("unique_name", name),
                Claim::new("exp", exp.to_string()),
            ],
        )
    }

    fn cache_with(source: Arc<ScriptedSource>, clock: ManualClock) -> ClaimsEnrichmentCache {
        ClaimsEnrichmentCache::new(source, Arc::new(clock), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn unauthenticated_principal_is_untouched() {
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), ManualClock::at(t0()));

        let mut p = Principal::anonymous();
        cache.enrich(&mut p).await.unwrap();

        assert!(p.claims().is_empty());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 600;

        let mut first = principal("alice", exp);
        cache.enrich(&mut first).await.unwrap();
        let mut second = principal("alice", exp);
        cache.enrich(&mut second).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(second.roles(), vec!["Administrator"]);
        assert_eq!(second.find_first("fetch"), Some("1"));
        assert_eq!(second.name(), Some("alice"));
    }

    #[tokio::test]
    async fn entry_expires_exactly_at_token_exp() {
        let clock = ManualClock::at(t0());
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), clock.clone());
        let exp = t0().timestamp() + 3600;

        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        assert_eq!(
            cache.cached_expiry("alice"),
            Some(t0() + chrono::Duration::seconds(3600))
        );

        clock.advance(chrono::Duration::seconds(3599));
        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        assert_eq!(source.calls(), 1);

        // exactly at exp the entry is already gone
        clock.advance(chrono::Duration::seconds(1));
        let mut at_exp = principal("alice", exp + 3600);
        cache.enrich(&mut at_exp).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(at_exp.find_first("fetch"), Some("2"));
        assert_eq!(
            cache.cached_expiry("alice"),
            Some(t0() + chrono::Duration::seconds(7200))
        );
    }

    #[tokio::test]
    async fn lookup_after_exp_misses() {
        let clock = ManualClock::at(t0());
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), clock.clone());
        let exp = t0().timestamp() + 3600;

        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        clock.advance(chrono::Duration::seconds(3601));

        let mut late = principal("alice", exp + 3600);
        cache.enrich(&mut late).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(late.find_first("fetch"), Some("2"));
    }

    #[tokio::test]
    async fn expired_entries_of_other_names_are_swept_on_insert() {
        let clock = ManualClock::at(t0());
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), clock.clone());
        let short = t0().timestamp() + 60;

        for name in ["alice", "bob", "carol", "dave"] {
            cache.enrich(&mut principal(name, short)).await.unwrap();
        }
        assert_eq!(cache.cached_len(), MIN_SWEEP_LEN);

        clock.advance(chrono::Duration::seconds(120));
        let long = t0().timestamp() + 3600;
        cache.enrich(&mut principal("eve", long)).await.unwrap();

        assert_eq!(cache.cached_len(), 1);
        assert!(cache.cached_expiry("alice").is_none());
        assert!(cache.cached_expiry("eve").is_some());
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_fetch() {
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 3600;

        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        cache.enrich(&mut principal("bob", exp)).await.unwrap();
        cache.invalidate("alice");

        let mut p = principal("alice", exp);
        cache.enrich(&mut p).await.unwrap();
        assert_eq!(source.calls(), 3);
        assert_eq!(p.find_first("fetch"), Some("3"));

        cache.enrich(&mut principal("bob", exp)).await.unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_fetch() {
        let source = Arc::new(ScriptedSource {
            gated: true,
            ..Default::default()
        });
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 3600;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let mut p = principal("alice", exp);
                    cache.enrich(&mut p).await.map(|_| p)
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.gate.notify_one();

        for task in tasks {
            let p = task.await.unwrap().unwrap();
            assert_eq!(p.find_first("fetch"), Some("1"));
            assert_eq!(p.roles(), vec!["Administrator"]);
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_waiter_and_is_not_cached() {
        let source = Arc::new(ScriptedSource {
            gated: true,
            fail: true,
            ..Default::default()
        });
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 3600;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let mut p = principal("alice", exp);
                    let result = cache.enrich(&mut p).await;
                    (result, p.claims().len())
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.gate.notify_one();

        for task in tasks {
            let (result, claim_count) = task.await.unwrap();
            assert_eq!(
                result,
                Err(EnrichError::Source {
                    backend: "scripted",
                    message: "stored claims are malformed: backing store down".into(),
                })
            );
            assert_eq!(claim_count, 2, "principal must be left as validated");
        }
        assert_eq!(source.calls(), 1);
        assert!(cache.cached_expiry("alice").is_none());

        source.gate.notify_one();
        let retry = cache.enrich(&mut principal("alice", exp)).await;
        assert!(retry.is_err());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_releases_the_in_flight_marker() {
        let source = Arc::new(ScriptedSource {
            hang_first: true,
            ..Default::default()
        });
        let cache = ClaimsEnrichmentCache::new(
            source.clone(),
            Arc::new(ManualClock::at(t0())),
            Duration::from_millis(50),
        );
        let exp = t0().timestamp() + 3600;

        let err = cache.enrich(&mut principal("alice", exp)).await.unwrap_err();
        assert_eq!(err, EnrichError::Timeout(Duration::from_millis(50)));

        let mut p = principal("alice", exp);
        cache.enrich(&mut p).await.unwrap();
        assert_eq!(p.find_first("fetch"), Some("2"));
    }

    #[tokio::test]
    async fn missing_or_malformed_exp_fails_without_fetching() {
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), ManualClock::at(t0()));

        let mut no_exp = Principal::authenticated(
            SchemeName::new("LocalBearer"),
            "unique_name",
            "role",
            vec![Claim::new("unique_name", "alice")],
        );
        assert_eq!(cache.enrich(&mut no_exp).await, Err(EnrichError::InvalidExpiry));
        assert_eq!(
            cache.enrich(&mut principal("alice", "tomorrow")).await,
            Err(EnrichError::InvalidExpiry)
        );
        assert_eq!(
            cache.enrich(&mut principal("alice", i64::MAX)).await,
            Err(EnrichError::InvalidExpiry)
        );

        assert_eq!(source.calls(), 0);
        assert!(cache.cached_expiry("alice").is_none());
    }

    #[tokio::test]
    async fn already_expired_token_is_enriched_but_not_cached() {
        let source = Arc::new(ScriptedSource::default());
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() - 1;

        let mut p = principal("alice", exp);
        cache.enrich(&mut p).await.unwrap();
        assert_eq!(p.roles(), vec!["Administrator"]);
        assert!(cache.cached_expiry("alice").is_none());

        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalidation_during_fetch_discards_the_result() {
        let source = Arc::new(ScriptedSource {
            gated: true,
            ..Default::default()
        });
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 3600;

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut p = principal("alice", exp);
                cache.enrich(&mut p).await.map(|_| p)
            })
        };

        source.wait_for_calls(1).await;
        cache.invalidate("alice");
        source.gate.notify_one();

        let p = pending.await.unwrap().unwrap();
        assert_eq!(p.find_first("fetch"), Some("1"));
        assert!(cache.cached_expiry("alice").is_none());

        source.gate.notify_one();
        cache.enrich(&mut principal("alice", exp)).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fetch_after_invalidation_waits_for_the_stale_one() {
        let source = Arc::new(ScriptedSource {
            gated: true,
            ..Default::default()
        });
        let cache = cache_with(source.clone(), ManualClock::at(t0()));
        let exp = t0().timestamp() + 3600;

        let spawn_enrich = || {
            let cache = cache.clone();
            tokio::spawn(async move {
                let mut p = principal("alice", exp);
                cache.enrich(&mut p).await.map(|_| p)
            })
        };

        let stale = spawn_enrich();
        source.wait_for_calls(1).await;
        cache.invalidate("alice");

        let fresh = spawn_enrich();
        let joiner = spawn_enrich();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 1, "new fetch must queue behind the stale one");

        source.gate.notify_one();
        let p = stale.await.unwrap().unwrap();
        assert_eq!(p.find_first("fetch"), Some("1"));

        source.wait_for_calls(2).await;
        source.gate.notify_one();
        for task in [fresh, joiner] {
            let p = task.await.unwrap().unwrap();
            assert_eq!(p.find_first("fetch"), Some("2"));
        }

        assert_eq!(source.calls(), 2);
        assert_eq!(source.max_active(), 1);
        assert_eq!(
            cache.cached_expiry("alice"),
            Some(t0() + chrono::Duration::seconds(3600))
        );
    }
}
