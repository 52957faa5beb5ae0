//! In-memory response cache with TTL and stale-while-revalidate.
//!
//! Entries are served fresh while `age <= ttl`. Entries that opted into
//! stale-while-revalidate are served stale while `age <= ttl + max_stale`
//! and refreshed by a background task tracked here. Anything older is
//! purged on read or by the periodic sweep.
//!
//! Every invalidation bumps a generation counter. Writes that were
//! started under an older generation are dropped, so a refresh that was
//! already in flight cannot bring a cleared entry back.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::CacheControl;
use crate::data::{CacheConfig, HeaderSet};

/// Validators and directives captured from the response that filled an
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub cache_control: Option<CacheControl>,
}

impl ResponseMeta {
    pub fn from_headers(headers: &HeaderSet) -> Self {
        Self {
            etag: headers.get("etag").map(str::to_string),
            last_modified: headers.get("last-modified").map(str::to_string),
            cache_control: headers.get("cache-control").map(CacheControl::parse),
        }
    }

    /// `If-None-Match` / `If-Modified-Since` for revalidating this entry.
    pub fn conditional_headers(&self) -> HeaderSet {
        let mut headers = HeaderSet::new();
        if let Some(ref etag) = self.etag {
            headers.insert("If-None-Match", etag.clone());
        }
        if let Some(ref last_modified) = self.last_modified {
            headers.insert("If-Modified-Since", last_modified.clone());
        }
        headers
    }

    fn is_storable(&self) -> bool {
        self.cache_control.as_ref().is_none_or(CacheControl::is_storable)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub created_at: Instant,
    pub ttl: Duration,
    pub stale_while_revalidate: bool,
    pub max_stale_time: Duration,
    pub meta: ResponseMeta,
}

impl<V> CacheEntry<V> {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    fn hard_expiry(&self) -> Duration {
        if self.stale_while_revalidate {
            self.ttl.saturating_add(self.max_stale_time)
        } else {
            self.ttl
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.hard_expiry()
    }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Fresh(V),
    Stale(V),
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntryStats {
    pub key: String,
    pub age: Duration,
    pub ttl: Duration,
    pub stale: bool,
    pub stale_while_revalidate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub capacity: usize,
    pub revalidating: usize,
    pub entries: Vec<CacheEntryStats>,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    revalidating: HashSet<String>,
    generation: u64,
}

pub struct ResponseCache<V> {
    state: Mutex<CacheState<V>>,
    capacity: usize,
    tasks: Mutex<JoinSet<()>>,
    sweeper: Mutex<Option<AbortHandle>>,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                revalidating: HashSet::new(),
                generation: 0,
            }),
            capacity: capacity.max(1),
            tasks: Mutex::new(JoinSet::new()),
            sweeper: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lookup(&self, key: &str) -> Lookup<V> {
        let now = Instant::now();
        let mut state = self.state();

        let Some(entry) = state.entries.get(key) else {
            return Lookup::Absent;
        };

        let age = entry.age(now);
        if age <= entry.ttl {
            debug!(key, age_ms = age.as_millis() as u64, "cache hit");
            return Lookup::Fresh(entry.payload.clone());
        }
        if entry.stale_while_revalidate && !entry.is_expired(now) {
            debug!(key, age_ms = age.as_millis() as u64, "serving stale entry");
            return Lookup::Stale(entry.payload.clone());
        }

        debug!(key, age_ms = age.as_millis() as u64, "cache entry expired");
        state.entries.remove(key);
        Lookup::Absent
    }

    /// Store a successful response. Returns `false` when the response
    /// forbade storage.
    pub fn store(&self, key: impl Into<String>, payload: V, meta: ResponseMeta, config: &CacheConfig) -> bool {
        let mut state = self.state();
        Self::insert(&mut state, self.capacity, key.into(), payload, meta, config)
    }

    /// [`store`](Self::store), unless the cache was invalidated after
    /// `generation` was read.
    pub fn store_if_current(
        &self,
        generation: u64,
        key: impl Into<String>,
        payload: V,
        meta: ResponseMeta,
        config: &CacheConfig,
    ) -> bool {
        let key = key.into();
        let mut state = self.state();
        if state.generation != generation {
            debug!(key = %key, "cache invalidated while fetching, dropping response");
            return false;
        }
        Self::insert(&mut state, self.capacity, key, payload, meta, config)
    }

    fn insert(
        state: &mut CacheState<V>,
        capacity: usize,
        key: String,
        payload: V,
        meta: ResponseMeta,
        config: &CacheConfig,
    ) -> bool {
        if !meta.is_storable() {
            debug!(key = %key, "response forbids caching");
            return false;
        }

        state.entries.insert(
            key,
            CacheEntry {
                payload,
                created_at: Instant::now(),
                ttl: config.ttl,
                stale_while_revalidate: config.stale_while_revalidate,
                max_stale_time: config.max_stale_time,
                meta,
            },
        );
        evict_oldest(&mut state.entries, capacity);
        true
    }

    /// Restart an entry's age after the server confirmed it unchanged.
    pub fn touch(&self, key: &str) -> bool {
        match self.state().entries.get_mut(key) {
            Some(entry) => {
                entry.created_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// [`touch`](Self::touch), unless the cache was invalidated after
    /// `generation` was read.
    pub fn touch_if_current(&self, generation: u64, key: &str) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            return false;
        }
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.created_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Counter bumped by every invalidation, clear and reset.
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    pub fn meta(&self, key: &str) -> Option<ResponseMeta> {
        self.state().entries.get(key).map(|entry| entry.meta.clone())
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state();
        state.generation += 1;
        state.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.entries.clear();
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state();
        state.generation += 1;
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let state = self.state();
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .map(|(key, entry)| CacheEntryStats {
                key: key.clone(),
                age: entry.age(now),
                ttl: entry.ttl,
                stale: entry.age(now) > entry.ttl,
                stale_while_revalidate: entry.stale_while_revalidate,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            entry_count: state.entries.len(),
            capacity: self.capacity,
            revalidating: state.revalidating.len(),
            entries,
        }
    }

    /// Purge entries past their stale window, then trim to capacity
    /// oldest-first. Returns how many entries were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        evict_oldest(&mut state.entries, self.capacity);
        let removed = before - state.entries.len();
        trace!(removed, remaining = state.entries.len(), "cache sweep");
        removed
    }

    /// Run `refresh` in the background unless a refresh for `key` is already
    /// running. Returns whether a task was started.
    pub fn spawn_revalidation<F>(self: &Arc<Self>, key: String, refresh: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.state().revalidating.insert(key.clone()) {
            debug!(key = %key, "revalidation already running");
            return false;
        }

        let guard = Revalidating {
            cache: Arc::downgrade(self),
            key,
        };
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let _guard = guard;
            refresh.await;
        });
        true
    }

    /// Wait for every background revalidation started so far.
    pub async fn await_revalidations(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks());
        while tasks.join_next().await.is_some() {}
    }

    /// Start the periodic sweep. Without a tokio runtime there is nothing
    /// to drive the timer, so no sweeper is started.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime, cache sweep disabled");
            return false;
        };
        if interval.is_zero() {
            return false;
        }

        let cache: Weak<Self> = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        });

        if let Some(previous) = self.sweeper().replace(handle.abort_handle()) {
            previous.abort();
        }
        true
    }

    /// Abort background revalidations and drop all entries. The sweeper
    /// keeps running.
    pub fn reset(&self) {
        self.tasks().abort_all();
        let mut state = self.state();
        state.generation += 1;
        state.entries.clear();
        state.revalidating.clear();
    }

    /// [`reset`](Self::reset), then stop the sweeper.
    pub fn dispose(&self) {
        if let Some(sweeper) = self.sweeper().take() {
            sweeper.abort();
        }
        self.reset();
    }

    fn state(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweeper(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Drop for ResponseCache<V> {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.lock()
            && let Some(sweeper) = sweeper.take()
        {
            sweeper.abort();
        }
    }
}

/// Clears the in-flight marker for a key when its refresh finishes or is
/// aborted.
struct Revalidating<V> {
    cache: Weak<ResponseCache<V>>,
    key: String,
}

impl<V> Drop for Revalidating<V> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade()
            && let Ok(mut state) = cache.state.lock()
        {
            state.revalidating.remove(&self.key);
        }
    }
}

fn evict_oldest<V>(entries: &mut HashMap<String, CacheEntry<V>>, capacity: usize) {
    if entries.len() <= capacity {
        return;
    }

    let mut by_age: Vec<(Instant, String)> = entries
        .iter()
        .map(|(key, entry)| (entry.created_at, key.clone()))
        .collect();
    by_age.sort();

    let excess = entries.len() - capacity;
    for (_, key) in by_age.into_iter().take(excess) {
        debug!(key = %key, "evicting cache entry over capacity");
        entries.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ttl(ms: u64) -> CacheConfig {
        CacheConfig::new(Duration::from_millis(ms))
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_until_ttl_then_absent() {
        let cache = ResponseCache::new(10);
        cache.store("k", 1u32, ResponseMeta::default(), &ttl(5000));

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert_eq!(cache.lookup("k"), Lookup::Fresh(1));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.lookup("k"), Lookup::Absent);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_then_expiry() {
        let cache = ResponseCache::new(10);
        let config = ttl(1000).stale_while_revalidate(Duration::from_millis(500));
        cache.store("k", 1u32, ResponseMeta::default(), &config);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.lookup("k"), Lookup::Stale(1));

        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(cache.lookup("k"), Lookup::Stale(1));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.lookup("k"), Lookup::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_restarts_age() {
        let cache = ResponseCache::new(10);
        cache.store("k", 1u32, ResponseMeta::default(), &ttl(100));

        tokio::time::advance(Duration::from_millis(90)).await;
        assert!(cache.touch("k"));
        tokio::time::advance(Duration::from_millis(90)).await;
        assert_eq!(cache.lookup("k"), Lookup::Fresh(1));
        assert!(!cache.touch("missing"));
    }

    #[tokio::test]
    async fn no_store_responses_are_skipped() {
        let cache = ResponseCache::new(10);
        let meta = ResponseMeta::from_headers(&HeaderSet::new().with("Cache-Control", "no-store"));

        assert!(!cache.store("k", 1u32, meta, &ttl(1000)));
        assert_eq!(cache.lookup("k"), Lookup::Absent);
    }

    #[tokio::test]
    async fn no_cache_responses_are_skipped() {
        let cache = ResponseCache::new(10);
        let meta = ResponseMeta::from_headers(&HeaderSet::new().with("Cache-Control", "no-cache"));

        assert!(!cache.store("k", 1u32, meta, &ttl(1000)));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_needs_opt_in() {
        let cache = ResponseCache::new(10);
        let config = CacheConfig {
            max_stale_time: Duration::from_millis(500),
            ..ttl(1000)
        };
        cache.store("k", 1u32, ResponseMeta::default(), &config);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.lookup("k"), Lookup::Absent);
    }

    #[tokio::test]
    async fn writes_from_an_older_generation_are_dropped() {
        let cache = ResponseCache::new(10);
        let clears: [fn(&ResponseCache<u32>); 4] = [
            |cache| {
                cache.invalidate("k");
            },
            |cache| cache.clear(),
            |cache| {
                cache.clear_prefix("other:");
            },
            |cache| cache.reset(),
        ];

        for clear in clears {
            cache.store("k", 1u32, ResponseMeta::default(), &ttl(1000));
            let generation = cache.generation();
            clear(&cache);

            assert!(!cache.store_if_current(generation, "k", 2u32, ResponseMeta::default(), &ttl(1000)));
            assert!(!cache.touch_if_current(generation, "k"));
            assert_ne!(cache.lookup("k"), Lookup::Fresh(2));
        }

        let generation = cache.generation();
        assert!(cache.store_if_current(generation, "k", 3u32, ResponseMeta::default(), &ttl(1000)));
        assert!(cache.touch_if_current(generation, "k"));
        assert_eq!(cache.lookup("k"), Lookup::Fresh(3));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_aborts_revalidations() {
        let cache = Arc::new(ResponseCache::<u32>::new(10));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        cache.spawn_revalidation("k".into(), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cache.reset();
        cache.await_revalidations().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().revalidating, 0);
    }

    #[test]
    fn meta_builds_conditional_headers() {
        let headers = HeaderSet::new()
            .with("ETag", "\"v1\"")
            .with("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT");
        let meta = ResponseMeta::from_headers(&headers);
        let conditional = meta.conditional_headers();

        assert_eq!(conditional.get("if-none-match"), Some("\"v1\""));
        assert_eq!(conditional.get("if-modified-since"), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert!(ResponseMeta::default().conditional_headers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_oldest_first() {
        let cache = ResponseCache::new(2);
        cache.store("a", 1u32, ResponseMeta::default(), &ttl(60_000));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.store("b", 2u32, ResponseMeta::default(), &ttl(60_000));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.store("c", 3u32, ResponseMeta::default(), &ttl(60_000));

        assert_eq!(cache.lookup("a"), Lookup::Absent);
        assert_eq!(cache.lookup("b"), Lookup::Fresh(2));
        assert_eq!(cache.lookup("c"), Lookup::Fresh(3));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_past_stale_window() {
        let cache = ResponseCache::new(10);
        cache.store("short", 1u32, ResponseMeta::default(), &ttl(100));
        cache.store(
            "swr",
            2u32,
            ResponseMeta::default(),
            &ttl(100).stale_while_revalidate(Duration::from_millis(1000)),
        );
        cache.store("long", 3u32, ResponseMeta::default(), &ttl(10_000));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 2);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.lookup("long"), Lookup::Fresh(3));
    }

    #[tokio::test]
    async fn prefix_clear_only_touches_namespace() {
        let cache = ResponseCache::new(10);
        cache.store("templates:GET /a", 1u32, ResponseMeta::default(), &ttl(1000));
        cache.store("templates:GET /b", 2u32, ResponseMeta::default(), &ttl(1000));
        cache.store("shops:GET /c", 3u32, ResponseMeta::default(), &ttl(1000));

        assert_eq!(cache.clear_prefix("templates:"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("shops:GET /c"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_age_and_staleness() {
        let cache = ResponseCache::new(10);
        cache.store("a", 1u32, ResponseMeta::default(), &ttl(100));
        cache.store("b", 2u32, ResponseMeta::default(), &ttl(1000));
        tokio::time::advance(Duration::from_millis(200)).await;

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.entries[0].key, "a");
        assert!(stats.entries[0].stale);
        assert!(!stats.entries[1].stale);
        assert_eq!(stats.entries[1].age, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn revalidation_is_single_flight() {
        let cache = Arc::new(ResponseCache::<u32>::new(10));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            cache.spawn_revalidation("k".into(), async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(cache.stats().revalidating, 1);

        cache.await_revalidations().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().revalidating, 0);

        let runs_again = Arc::clone(&runs);
        assert!(cache.spawn_revalidation("k".into(), async move {
            runs_again.fetch_add(1, Ordering::SeqCst);
        }));
        cache.await_revalidations().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically() {
        let cache = Arc::new(ResponseCache::new(10));
        cache.store("k", 1u32, ResponseMeta::default(), &ttl(1000));
        assert!(cache.start_sweeper(Duration::from_secs(300)));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(cache.is_empty());

        cache.dispose();
    }

    #[test]
    fn sweeper_needs_a_runtime() {
        let cache = Arc::new(ResponseCache::<u32>::new(10));
        assert!(!cache.start_sweeper(Duration::from_secs(300)));
    }
}
