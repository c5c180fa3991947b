use arc_swap::ArcSwap;
use dashmap::DashMap;
use hermes_core::config::{CacheConfig, CacheLifetime};
use hermes_core::envelope::{PayloadKind, ResponseEnvelope};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Identifies a cacheable call: target URL, expected payload kind and the
/// ordered URI substitution values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    payload_kind: PayloadKind,
    uri_vars: Vec<String>,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, payload_kind: PayloadKind, uri_vars: &[String]) -> Self {
        Self {
            url: url.into(),
            payload_kind,
            uri_vars: uri_vars.to_vec(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload_kind(&self) -> &PayloadKind {
        &self.payload_kind
    }

    pub fn uri_vars(&self) -> &[String] {
        &self.uri_vars
    }
}

/// A stored response and the monotonic instant it was inserted.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    inserted_at: Instant,
    response: Arc<ResponseEnvelope>,
}

impl CacheEntry {
    pub fn new(response: ResponseEnvelope) -> Self {
        Self {
            inserted_at: Instant::now(),
            response: Arc::new(response),
        }
    }

    pub fn response(&self) -> &ResponseEnvelope {
        &self.response
    }

    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    fn is_expired(&self, lifetime: Lifetime) -> bool {
        match lifetime {
            Lifetime::Infinite => false,
            Lifetime::Finite(max) => self.age() > max,
        }
    }
}

/// How long entries stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Finite(Duration),
    Infinite,
}

impl From<CacheLifetime> for Lifetime {
    fn from(lifetime: CacheLifetime) -> Self {
        match lifetime.as_duration() {
            Some(d) => Lifetime::Finite(d),
            None => Lifetime::Infinite,
        }
    }
}

/// Time-bounded response cache shared by all invocations of a pipeline.
///
/// Expired entries are dropped lazily on `get` and by a background prune task
/// that runs every `prune_interval`. There is no size bound.
pub struct ResponseCache {
    inner: Arc<Inner>,
    sweeper: Mutex<Sweeper>,
}

struct Inner {
    name: String,
    entries: DashMap<CacheKey, CacheEntry>,
    lifetime: ArcSwap<Lifetime>,
}

struct Sweeper {
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

impl ResponseCache {
    /// Create a cache and start its prune task on the current tokio runtime.
    ///
    /// A zero `prune_interval`, or no runtime, leaves pruning to `get`.
    pub fn new(name: impl Into<String>, lifetime: Lifetime, prune_interval: Duration) -> Self {
        let cache = Self {
            inner: Arc::new(Inner {
                name: name.into(),
                entries: DashMap::new(),
                lifetime: ArcSwap::from_pointee(lifetime),
            }),
            sweeper: Mutex::new(Sweeper {
                interval: prune_interval,
                handle: None,
            }),
        };
        cache.set_prune_interval(prune_interval);
        cache
    }

    pub fn from_config(name: impl Into<String>, config: &CacheConfig) -> Self {
        Self::new(name, config.lifetime.into(), config.prune_interval())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Set lifetime and prune interval together.
    pub fn configure(&self, lifetime: Lifetime, prune_interval: Duration) {
        self.set_lifetime(lifetime);
        self.set_prune_interval(prune_interval);
    }

    pub fn lifetime(&self) -> Lifetime {
        **self.inner.lifetime.load()
    }

    /// Takes effect for the next `get` and the next prune tick.
    pub fn set_lifetime(&self, lifetime: Lifetime) {
        self.inner.lifetime.store(Arc::new(lifetime));
    }

    pub fn prune_interval(&self) -> Duration {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .interval
    }

    /// Cancel the running prune task and start a new one with `interval`.
    ///
    /// The old task is aborted while the sweeper lock is held, so two prune
    /// schedules never run side by side.
    pub fn set_prune_interval(&self, interval: Duration) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sweeper.handle.take() {
            handle.abort();
        }
        sweeper.interval = interval;

        if interval.is_zero() {
            debug!(cache = %self.inner.name, "Automatic prune disabled");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(cache = %self.inner.name, "No async runtime, automatic prune disabled");
            return;
        };

        let inner = Arc::downgrade(&self.inner);
        sweeper.handle = Some(runtime.spawn(prune_loop(inner, interval)));
    }

    /// Stored entry for `key`, unless missing or expired. An expired entry is
    /// removed as a side effect.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let lifetime = self.lifetime();
        match self.inner.entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(lifetime) => return Some(entry.value().clone()),
            Some(_) => {}
        }
        // Shard guard is released; only drop the entry if it is still the stale one.
        self.inner.entries.remove_if(key, |_, entry| entry.is_expired(lifetime));
        None
    }

    /// Insert or overwrite.
    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        self.inner.entries.insert(key, entry);
    }

    /// Remove every entry stored under `payload_kind` whose response matches
    /// `predicate`. Returns the number of entries removed.
    pub fn remove_matching<F>(&self, payload_kind: &PayloadKind, predicate: F) -> usize
    where
        F: Fn(&ResponseEnvelope) -> bool,
    {
        let mut removed = 0;
        self.inner.entries.retain(|key, entry| {
            let evict = key.payload_kind == *payload_kind && predicate(entry.response());
            if evict {
                removed += 1;
            }
            !evict
        });
        if removed > 0 {
            debug!(cache = %self.inner.name, kind = %payload_kind, removed, "Cache entries invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Run one prune pass now. Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        self.inner.prune()
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        let sweeper = self.sweeper.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sweeper.handle.take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn prune(&self) -> usize {
        let lifetime = **self.lifetime.load();
        if lifetime == Lifetime::Infinite {
            return 0;
        }

        info!(cache = %self.name, "Starting cache prune");
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(lifetime);
            if expired {
                removed += 1;
            }
            !expired
        });
        info!(cache = %self.name, removed, "Cache prune finished");
        removed
    }
}

async fn prune_loop(inner: Weak<Inner>, interval: Duration) {
    let start = tokio::time::Instant::now() + interval;
    let mut tick = tokio::time::interval_at(start, interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.prune();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(url: &str, kind: &str, vars: &[&str]) -> CacheKey {
        let vars: Vec<String> = vars.iter().map(|v| v.to_string()).collect();
        CacheKey::new(url, PayloadKind::from(kind), &vars)
    }

    fn entry(id: &str) -> CacheEntry {
        CacheEntry::new(ResponseEnvelope::ok(json!({ "id": id })))
    }

    fn cache(lifetime: Lifetime) -> ResponseCache {
        ResponseCache::new("test", lifetime, Duration::ZERO)
    }

    #[test]
    fn put_then_get_returns_entry() {
        let c = cache(Lifetime::Finite(Duration::from_secs(60)));
        c.put(key("http://svc/t/{id}", "Test", &["42"]), entry("42"));
        let hit = c.get(&key("http://svc/t/{id}", "Test", &["42"])).unwrap();
        assert_eq!(hit.response().payload, Some(json!({ "id": "42" })));
    }

    #[test]
    fn key_requires_all_three_fields_to_match() {
        let c = cache(Lifetime::Infinite);
        c.put(key("http://svc/a", "Test", &["1", "2"]), entry("x"));

        assert!(c.get(&key("http://svc/a", "Other", &["1", "2"])).is_none());
        assert!(c.get(&key("http://svc/a", "Test", &["2", "1"])).is_none());
        assert!(c.get(&key("http://svc/a", "Test", &["1"])).is_none());
        assert!(c.get(&key("http://svc/b", "Test", &["1", "2"])).is_none());
        assert!(c.get(&key("http://svc/a", "Test", &["1", "2"])).is_some());
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let c = cache(Lifetime::Infinite);
        let k = key("u", "Test", &[]);
        c.put(k.clone(), entry("old"));
        c.put(k.clone(), entry("new"));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&k).unwrap().response().payload, Some(json!({ "id": "new" })));
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let c = cache(Lifetime::Finite(Duration::from_millis(20)));
        let k = key("u", "Test", &[]);
        c.put(k.clone(), entry("1"));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(c.len(), 1, "nothing sweeps without a prune task");
        assert!(c.get(&k).is_none());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn prune_removes_only_expired_entries() {
        let c = cache(Lifetime::Finite(Duration::from_millis(30)));
        c.put(key("old", "Test", &[]), entry("1"));
        std::thread::sleep(Duration::from_millis(60));
        c.put(key("fresh", "Test", &[]), entry("2"));
        assert_eq!(c.prune(), 1);
        assert!(c.get(&key("fresh", "Test", &[])).is_some());
    }

    #[test]
    fn infinite_lifetime_disables_eviction() {
        let c = cache(Lifetime::Infinite);
        c.put(key("u", "Test", &[]), entry("1"));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.prune(), 0);
        assert!(c.get(&key("u", "Test", &[])).is_some());
    }

    #[test]
    fn shortening_lifetime_applies_to_existing_entries() {
        let c = cache(Lifetime::Infinite);
        let k = key("u", "Test", &[]);
        c.put(k.clone(), entry("1"));
        std::thread::sleep(Duration::from_millis(20));
        c.set_lifetime(Lifetime::Finite(Duration::from_millis(5)));
        assert!(c.get(&k).is_none());
    }

    #[test]
    fn remove_matching_filters_by_kind_and_predicate() {
        let c = cache(Lifetime::Infinite);
        c.put(key("a", "Test", &["1"]), entry("1"));
        c.put(key("a", "Test", &["2"]), entry("2"));
        c.put(key("a", "Other", &["1"]), entry("1"));

        let removed = c.remove_matching(&PayloadKind::from("Test"), |resp| {
            resp.payload.as_ref().map(|p| p["id"] == "1").unwrap_or(false)
        });

        assert_eq!(removed, 1);
        assert!(c.get(&key("a", "Test", &["1"])).is_none());
        assert!(c.get(&key("a", "Test", &["2"])).is_some());
        assert!(c.get(&key("a", "Other", &["1"])).is_some());
    }

    #[test]
    fn clear_drops_everything() {
        let c = cache(Lifetime::Infinite);
        c.put(key("a", "Test", &[]), entry("1"));
        c.put(key("b", "Test", &[]), entry("2"));
        c.clear();
        assert!(c.is_empty());
    }

    #[test]
    fn no_runtime_means_no_prune_task() {
        let c = ResponseCache::new("no-rt", Lifetime::Infinite, Duration::from_millis(10));
        assert_eq!(c.prune_interval(), Duration::from_millis(10));
        assert!(c.sweeper.lock().unwrap().handle.is_none());
    }

    #[test]
    fn lifetime_converts_from_config() {
        assert_eq!(Lifetime::from(CacheLifetime::Infinite), Lifetime::Infinite);
        assert_eq!(
            Lifetime::from(CacheLifetime::Millis(250)),
            Lifetime::Finite(Duration::from_millis(250))
        );
    }

    #[tokio::test]
    async fn changing_interval_replaces_prune_task() {
        let c = ResponseCache::new("swap", Lifetime::Infinite, Duration::from_secs(60));
        assert!(c.sweeper.lock().unwrap().handle.is_some());

        c.set_prune_interval(Duration::ZERO);
        assert!(c.sweeper.lock().unwrap().handle.is_none());

        c.configure(Lifetime::Finite(Duration::from_secs(1)), Duration::from_secs(30));
        assert_eq!(c.prune_interval(), Duration::from_secs(30));
        assert!(c.sweeper.lock().unwrap().handle.is_some());
    }
}
