//! Cached, cancellable remote reads.
//!
//! A [`Query`] is one call site's view of a remote read: it starts `Ready`
//! when the shared cache already holds a live value for its key and
//! `Loading` otherwise. Loads run the caller's async loader, write the
//! result back into the cache and update the query's state.
//!
//! ```text
//! Idle -> Loading -> Ready
//!                 -> Failed
//! ```
//!
//! A load is superseded by a newer load, a `rekey` to a different key or
//! dependency list, or `unmount`. Superseded loads are signalled through
//! their [`CancellationToken`] and their results are dropped even if the
//! loader ignores the signal.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{self, SharedCache};
use crate::error::FetchError;
use crate::ports::ExceptionReporter;

/// Fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Cache TTL for fetched values.
    #[serde(default = "default_fetch_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Upper bound on a single load; unbounded when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_fetch_ttl_secs() -> u64 {
    300
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_fetch_ttl_secs(),
            timeout_secs: None,
        }
    }
}

/// Per-query options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub ttl: Option<Duration>,
    pub dependencies: Vec<serde_json::Value>,
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a dependency. A change in any dependency's value re-keys the query.
    pub fn depends_on<D: Serialize>(mut self, dependency: &D) -> Self {
        self.dependencies
            .push(serde_json::to_value(dependency).unwrap_or(serde_json::Value::Null));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPhase {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// What a UI renders for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
    pub phase: FetchPhase,
    pub data: Option<T>,
    pub error: Option<FetchError>,
}

impl<T> FetchState<T> {
    fn loading() -> Self {
        Self {
            phase: FetchPhase::Loading,
            data: None,
            error: None,
        }
    }

    fn ready(data: T) -> Self {
        Self {
            phase: FetchPhase::Ready,
            data: Some(data),
            error: None,
        }
    }

    fn failed(error: FetchError) -> Self {
        Self {
            phase: FetchPhase::Failed,
            data: None,
            error: Some(error),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.phase == FetchPhase::Loading
    }
}

type SharedResult = Option<Result<serde_json::Value, FetchError>>;

struct Inflight {
    id: u64,
    result: watch::Receiver<SharedResult>,
}

/// Removes a leader's in-flight registration when its load ends or is
/// dropped, unless a newer leader has replaced it.
struct InflightGuard {
    registry: Arc<Mutex<HashMap<String, Inflight>>>,
    key: String,
    id: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if registry.get(&self.key).map(|f| f.id) == Some(self.id) {
            registry.remove(&self.key);
        }
    }
}

/// Creates queries over one shared cache and reporter.
#[derive(Clone)]
pub struct FetchCoordinator {
    cache: SharedCache,
    reporter: Arc<dyn ExceptionReporter>,
    config: FetchConfig,
    inflight: Arc<Mutex<HashMap<String, Inflight>>>,
    next_id: Arc<AtomicU64>,
}

impl FetchCoordinator {
    pub fn new(cache: SharedCache, reporter: Arc<dyn ExceptionReporter>, config: FetchConfig) -> Self {
        Self {
            cache,
            reporter,
            config,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Mount a query. Starts `Ready` on a live cache hit, `Loading` otherwise.
    pub fn query<T>(&self, key: impl Into<String>, options: FetchOptions) -> Query<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let key = key.into();
        let state = match self.cached::<T>(&key) {
            Some(data) => FetchState::ready(data),
            None => FetchState::loading(),
        };
        Query {
            coordinator: self.clone(),
            inner: Mutex::new(QueryInner {
                key,
                options,
                state,
                generation: 0,
                token: CancellationToken::new(),
            }),
        }
    }

    fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        cache::lock(&self.cache).get::<T>(key)
    }

    fn ttl_for(&self, options: &FetchOptions) -> Duration {
        options
            .ttl
            .unwrap_or_else(|| Duration::from_secs(self.config.default_ttl_secs))
    }

    fn timeout_for(&self, options: &FetchOptions) -> Option<Duration> {
        options
            .timeout
            .or_else(|| self.config.timeout_secs.map(Duration::from_secs))
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Inflight>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `loader`, or wait for an identical in-flight load by another call
    /// site and share its result.
    async fn load_shared<T, F, Fut>(
        &self,
        key: &str,
        join_inflight: bool,
        token: CancellationToken,
        loader: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let existing = if join_inflight {
            self.registry().get(key).map(|f| f.result.clone())
        } else {
            None
        };

        if let Some(mut result) = existing {
            debug!(key, "joining in-flight request");
            loop {
                let current = result.borrow().clone();
                if let Some(shared) = current {
                    return shared.and_then(|value| {
                        serde_json::from_value(value).map_err(|e| FetchError::Loader(e.to_string()))
                    });
                }
                if result.changed().await.is_err() {
                    // The leader was cancelled before producing anything.
                    debug!(key, "in-flight leader went away; loading directly");
                    break;
                }
            }
        }

        let (sender, receiver) = watch::channel(None);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry().insert(
            key.to_string(),
            Inflight {
                id,
                result: receiver,
            },
        );
        let _guard = InflightGuard {
            registry: self.inflight.clone(),
            key: key.to_string(),
            id,
        };

        let result = loader(token).await;
        let shared = match &result {
            Ok(value) => serde_json::to_value(value).map_err(|e| FetchError::Loader(e.to_string())),
            Err(e) => Err(e.clone()),
        };
        let _ = sender.send(Some(shared));
        result
    }
}

struct QueryInner<T> {
    key: String,
    options: FetchOptions,
    state: FetchState<T>,
    generation: u64,
    token: CancellationToken,
}

/// One call site's view of a cached remote read.
pub struct Query<T> {
    coordinator: FetchCoordinator,
    inner: Mutex<QueryInner<T>>,
}

impl<T> Query<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    fn lock(&self) -> MutexGuard<'_, QueryInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn key(&self) -> String {
        self.lock().key.clone()
    }

    pub fn snapshot(&self) -> FetchState<T> {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> FetchPhase {
        self.lock().state.phase
    }

    pub fn data(&self) -> Option<T> {
        self.lock().state.data.clone()
    }

    pub fn error(&self) -> Option<FetchError> {
        self.lock().state.error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock().state.is_loading()
    }

    /// Load unless the cache already holds a live value for the key.
    pub async fn load<F, Fut>(&self, loader: F) -> FetchPhase
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.run(loader, false).await
    }

    /// Load even if the cache is warm; the fresh value replaces the cached one.
    pub async fn refetch<F, Fut>(&self, loader: F) -> FetchPhase
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.run(loader, true).await
    }

    /// Point the query at a new key and/or dependency list.
    ///
    /// Returns `true` when either changed by value; any in-flight load is
    /// cancelled and the caller should `load` again.
    pub fn rekey(&self, key: impl Into<String>, dependencies: Vec<serde_json::Value>) -> bool {
        let key = key.into();
        let mut inner = self.lock();
        if inner.key == key && inner.options.dependencies == dependencies {
            return false;
        }

        debug!(from = %inner.key, to = %key, "query re-keyed");
        inner.token.cancel();
        inner.token = CancellationToken::new();
        inner.generation += 1;
        inner.options.dependencies = dependencies;
        inner.state = match self.coordinator.cached::<T>(&key) {
            Some(data) => FetchState::ready(data),
            None => FetchState::loading(),
        };
        inner.key = key;
        true
    }

    /// Tear the query down. In-flight loads are cancelled and their results
    /// will never be applied.
    pub fn unmount(&self) {
        let mut inner = self.lock();
        inner.token.cancel();
        inner.generation += 1;
        if inner.state.phase == FetchPhase::Loading {
            inner.state.phase = FetchPhase::Idle;
        }
    }

    async fn run<F, Fut>(&self, loader: F, force: bool) -> FetchPhase
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let (key, ttl, timeout, generation, token) = {
            let mut inner = self.lock();
            if !force {
                if let Some(data) = self.coordinator.cached::<T>(&inner.key) {
                    debug!(key = %inner.key, "serving query from cache");
                    inner.state = FetchState::ready(data);
                    return FetchPhase::Ready;
                }
            }

            inner.token.cancel();
            inner.token = CancellationToken::new();
            inner.generation += 1;
            inner.state.phase = FetchPhase::Loading;
            (
                inner.key.clone(),
                self.coordinator.ttl_for(&inner.options),
                self.coordinator.timeout_for(&inner.options),
                inner.generation,
                inner.token.clone(),
            )
        };

        let work = self
            .coordinator
            .load_shared(&key, !force, token.clone(), loader);
        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(FetchError::Timeout(limit))),
                None => work.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = bounded => Some(result),
        };

        self.settle(&key, ttl, generation, &token, outcome)
    }

    fn settle(
        &self,
        key: &str,
        ttl: Duration,
        generation: u64,
        token: &CancellationToken,
        outcome: Option<Result<T, FetchError>>,
    ) -> FetchPhase {
        let mut inner = self.lock();
        let Some(result) = outcome.filter(|_| inner.generation == generation && !token.is_cancelled())
        else {
            debug!(key, "discarding result of superseded request");
            return inner.state.phase;
        };

        match result {
            Ok(data) => {
                if let Err(e) = cache::lock(&self.coordinator.cache).set(key, &data, Some(ttl)) {
                    debug!(key, error = %e, "fetched value not cacheable");
                }
                inner.state = FetchState::ready(data);
            }
            Err(error) => {
                // Each query that sees the failure reports it, joiners included.
                let mut context = BTreeMap::new();
                context.insert("key".to_string(), key.to_string());
                self.coordinator.reporter.tag("component", "fetch");
                self.coordinator.reporter.report(&error, &context);
                inner.state = FetchState::failed(error);
            }
        }
        inner.state.phase
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheService};
    use crate::clock::ManualClock;
    use crate::ports::{CollectingReporter, MemoryStore};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    struct Fixture {
        coordinator: FetchCoordinator,
        reporter: Arc<CollectingReporter>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()));
        let reporter = Arc::new(CollectingReporter::new());
        let cache = CacheService::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
            reporter.clone(),
        )
        .into_shared();
        Fixture {
            coordinator: FetchCoordinator::new(cache, reporter.clone(), FetchConfig::default()),
            reporter,
            clock,
        }
    }

    #[tokio::test]
    async fn loads_and_caches() {
        let fx = fixture();
        let query = fx.coordinator.query::<Vec<u32>>("fetch:entries", FetchOptions::default());
        assert!(query.is_loading());

        let phase = query.load(|_| async { Ok(vec![1, 2, 3]) }).await;
        assert_eq!(phase, FetchPhase::Ready);
        assert_eq!(query.data(), Some(vec![1, 2, 3]));
        assert!(query.error().is_none());

        let cached: Option<Vec<u32>> = cache::lock(fx.coordinator.cache()).get("fetch:entries");
        assert_eq!(cached, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn warm_cache_skips_loader() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = fx.coordinator.query::<u32>("k", FetchOptions::default());
        let c = calls.clone();
        first
            .load(move |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        let second = fx.coordinator.query::<u32>("k", FetchOptions::default());
        assert_eq!(second.phase(), FetchPhase::Ready);
        let c = calls.clone();
        second
            .load(move |_| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(8)
            })
            .await;

        assert_eq!(second.data(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_share_one_load() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = fx.coordinator.query::<u32>("shared", FetchOptions::default());
        let b = fx.coordinator.query::<u32>("shared", FetchOptions::default());

        let load = |calls: Arc<AtomicUsize>| {
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok(11)
            }
        };
        let (pa, pb) = tokio::join!(a.load(load(calls.clone())), b.load(load(calls.clone())));

        assert_eq!((pa, pb), (FetchPhase::Ready, FetchPhase::Ready));
        assert_eq!(a.data(), Some(11));
        assert_eq!(b.data(), Some(11));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_exposes_error_and_reports_key() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>("fetch:broken", FetchOptions::default());
        let phase = query
            .load(|_| async { Err(FetchError::Loader("HTTP error! status: 500".into())) })
            .await;

        assert_eq!(phase, FetchPhase::Failed);
        assert!(query.data().is_none());
        assert_eq!(query.error(), Some(FetchError::Loader("HTTP error! status: 500".into())));
        assert!(!query.is_loading());

        let reports = fx.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].context["key"], "fetch:broken");
        assert_eq!(fx.reporter.tags()["component"], "fetch");
        // Failures never poison the cache.
        assert!(cache::lock(fx.coordinator.cache()).get::<u32>("fetch:broken").is_none());
    }

    #[tokio::test]
    async fn shared_failure_is_reported_by_each_call_site() {
        let fx = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = fx.coordinator.query::<u32>("fetch:down", FetchOptions::default());
        let b = fx.coordinator.query::<u32>("fetch:down", FetchOptions::default());

        let load = |calls: Arc<AtomicUsize>| {
            move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Err::<u32, _>(FetchError::Loader("unreachable".into()))
            }
        };
        let (pa, pb) = tokio::join!(a.load(load(calls.clone())), b.load(load(calls.clone())));

        assert_eq!((pa, pb), (FetchPhase::Failed, FetchPhase::Failed));
        // One remote read, but both mounted queries surface and report it.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let reports = fx.reporter.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.context["key"] == "fetch:down"));
    }

    #[tokio::test]
    async fn refetch_bypasses_cache_and_writes_back() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>("k", FetchOptions::default());
        query.load(|_| async { Ok(1) }).await;

        query.refetch(|_| async { Ok(2) }).await;
        assert_eq!(query.data(), Some(2));
        assert_eq!(cache::lock(fx.coordinator.cache()).get::<u32>("k"), Some(2));
    }

    #[tokio::test]
    async fn refetch_failure_clears_previous_data() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>("k", FetchOptions::default());
        query.load(|_| async { Ok(1) }).await;
        query
            .refetch(|_| async { Err(FetchError::Loader("offline".into())) })
            .await;
        assert_eq!(query.phase(), FetchPhase::Failed);
        assert!(query.data().is_none());
    }

    #[tokio::test]
    async fn ttl_option_controls_cache_lifetime() {
        let fx = fixture();
        let query = fx
            .coordinator
            .query::<u32>("short", FetchOptions::default().ttl(Duration::from_secs(60)));
        query.load(|_| async { Ok(3) }).await;

        fx.clock.advance(chrono::Duration::seconds(61));
        let again = fx.coordinator.query::<u32>("short", FetchOptions::default());
        assert!(again.is_loading());
    }

    #[tokio::test]
    async fn rekey_discards_superseded_result() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>("x", FetchOptions::default());
        let (release_x, x_released) = oneshot::channel::<()>();

        // The "x" loader ignores its cancellation token on purpose.
        let slow_x = query.load(move |_| async move {
            let _ = x_released.await;
            Ok(1)
        });
        let switch_to_y = async {
            tokio::task::yield_now().await;
            assert!(query.rekey("y", vec![]));
            let _ = release_x.send(());
            query.load(|_| async { Ok(2) }).await
        };
        let (_, phase_y) = tokio::join!(slow_x, switch_to_y);

        assert_eq!(phase_y, FetchPhase::Ready);
        assert_eq!(query.key(), "y");
        assert_eq!(query.data(), Some(2));
        assert!(cache::lock(fx.coordinator.cache()).get::<u32>("x").is_none());
    }

    #[tokio::test]
    async fn rekey_with_same_values_is_a_no_op() {
        let fx = fixture();
        let options = FetchOptions::default().depends_on(&"2024-01");
        let deps = options.dependencies.clone();
        let query = fx.coordinator.query::<u32>("k", options);
        assert!(!query.rekey("k", deps));
        assert!(query.rekey("k", vec![serde_json::json!("2024-02")]));
    }

    #[tokio::test]
    async fn unmount_drops_pending_load() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>("k", FetchOptions::default());

        let load = query.load(|cancel| async move {
            cancel.cancelled().await;
            Err(FetchError::Cancelled)
        });
        let teardown = async {
            tokio::task::yield_now().await;
            query.unmount();
        };
        let (phase, _) = tokio::join!(load, teardown);

        assert_eq!(phase, FetchPhase::Idle);
        assert!(query.error().is_none());
        assert!(fx.reporter.reports().is_empty());
        assert!(cache::lock(fx.coordinator.cache()).is_empty());
    }

    #[tokio::test]
    async fn timeout_fails_the_query() {
        let fx = fixture();
        let query = fx.coordinator.query::<u32>(
            "slow",
            FetchOptions::default().timeout(Duration::from_millis(20)),
        );
        let phase = query
            .load(|_| std::future::pending::<Result<u32, FetchError>>())
            .await;
        assert_eq!(phase, FetchPhase::Failed);
        assert_eq!(query.error(), Some(FetchError::Timeout(Duration::from_millis(20))));
    }
}
