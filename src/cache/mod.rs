//! Memoized role resolution with TTL, single-flight, and lifecycle
//! invalidation
//!
//! The cache is the only component that may serve a role without touching
//! the authority sources. Entries carry an expiry; fresh entries are served
//! directly, expired entries are served stale once while a refresh runs in
//! the background, and concurrent lookups for the same subject share one
//! underlying resolution. Sign-out invalidates everything immediately and
//! discards any resolution still in flight.

use crate::error::{AccessError, Result};
use crate::resolver::RoleResolver;
use crate::session::SessionEvent;
use crate::store::AuthorityStore;
use crate::types::{current_timestamp_ms, Role, SubjectId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Configuration for the role cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live from the last successful resolution
    pub ttl: Duration,

    /// Maximum number of cached subjects before expired entries are evicted
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            max_entries: 10_000,
        }
    }
}

/// Cache statistics for monitoring performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    /// Lookups answered with an expired value while a refresh ran
    pub stale_serve_count: u64,
    pub hit_rate: f64,
}

/// Cached resolution with expiration
#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    role: Option<Role>,
    expires_at: u64,
}

/// Broadcast slot for an in-flight resolution: `None` until it settles.
type PendingSlot = Option<Result<Option<Role>>>;

/// One in-flight resolution. The id distinguishes a flight from any
/// successor registered for the same subject after an invalidation.
struct Flight {
    id: u64,
    rx: watch::Receiver<PendingSlot>,
}

struct CacheInner<S> {
    resolver: Arc<RoleResolver<S>>,
    config: CacheConfig,
    entries: DashMap<SubjectId, CacheEntry>,
    /// Single-flight map: joiners wait on the receiver instead of issuing
    /// their own query sequence.
    pending: DashMap<SubjectId, Flight>,
    flight_seq: AtomicU64,
    /// Bumped on identity change; an in-flight resolution started under an
    /// older generation is discarded at completion time.
    generation: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    stale_count: AtomicU64,
}

/// Shared handle to the process-wide role cache.
///
/// Cloning is cheap and all clones observe the same state, which is how the
/// cache is handed to the session listener, the sync coordinator, and any
/// number of UI-facing callers at once.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use membership_authz::cache::{CacheConfig, RoleCache};
/// use membership_authz::resolver::RoleResolver;
/// use membership_authz::store::MemoryAuthorityStore;
/// use membership_authz::types::SubjectId;
///
/// # async fn example() -> membership_authz::Result<()> {
/// let store = Arc::new(MemoryAuthorityStore::new());
/// let resolver = Arc::new(RoleResolver::new(store));
/// let cache = RoleCache::new(resolver, CacheConfig::default());
///
/// let role = cache.get(&SubjectId::new("user-1")).await?;
/// # Ok(())
/// # }
/// ```
pub struct RoleCache<S> {
    inner: Arc<CacheInner<S>>,
}

impl<S> Clone for RoleCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: AuthorityStore + 'static> RoleCache<S> {
    pub fn new(resolver: Arc<RoleResolver<S>>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                resolver,
                config,
                entries: DashMap::new(),
                pending: DashMap::new(),
                flight_seq: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                hit_count: AtomicU64::new(0),
                miss_count: AtomicU64::new(0),
                stale_count: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the subject's role, cache-first.
    ///
    /// - fresh cached value: returned without any source query
    /// - expired cached value: returned immediately while a single-flight
    ///   refresh runs in the background (stale-while-revalidate)
    /// - no cached value: awaits a single-flight resolution
    ///
    /// # Errors
    ///
    /// Propagates resolver failures on the uncached path. Failures are never
    /// cached as negative results; a previously cached value, if any, stays
    /// intact.
    pub async fn get(&self, subject: &SubjectId) -> Result<Option<Role>> {
        let now = current_timestamp_ms();
        if let Some(entry) = self.inner.entries.get(subject).map(|e| *e) {
            if entry.expires_at > now {
                self.inner.hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.role);
            }

            // Stale: kick off a refresh, serve the old value meanwhile
            self.inner.stale_count.fetch_add(1, Ordering::Relaxed);
            let _ = self.spawn_flight(subject);
            return Ok(entry.role);
        }

        self.inner.miss_count.fetch_add(1, Ordering::Relaxed);
        self.resolve_shared(subject).await
    }

    /// Forces a resolution, joining one already in flight, and awaits it.
    pub async fn refresh(&self, subject: &SubjectId) -> Result<Option<Role>> {
        self.resolve_shared(subject).await
    }

    /// Drops the cached role for one subject.
    pub fn invalidate(&self, subject: &SubjectId) {
        self.inner.entries.remove(subject);
    }

    /// Drops every cached role and discards in-flight resolutions.
    ///
    /// Flights already running keep answering the callers that joined them,
    /// but their results are no longer cached and later lookups start a
    /// fresh flight.
    pub fn invalidate_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.entries.clear();
        self.inner.pending.clear();
    }

    /// Applies an identity-lifecycle event.
    ///
    /// Sign-out invalidates everything so no role leaks across identities
    /// sharing a client instance. Sign-in invalidates the subject and
    /// discards any resolution still in flight for it, so the first lookup
    /// always resolves fresh. A token refresh leaves the cache alone — the
    /// identity did not change.
    pub fn handle_session_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::SignedIn(subject) => {
                tracing::debug!(subject = %subject, "sign-in, invalidating cached role");
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                self.inner.pending.remove(subject);
                self.invalidate(subject);
            }
            SessionEvent::SignedOut => {
                tracing::debug!("sign-out, invalidating all cached roles");
                self.invalidate_all();
            }
            SessionEvent::TokenRefreshed(_) => {}
        }
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.hit_count.load(Ordering::Relaxed);
        let misses = self.inner.miss_count.load(Ordering::Relaxed);
        let stale = self.inner.stale_count.load(Ordering::Relaxed);
        let total = hits + misses + stale;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            size: self.inner.entries.len(),
            hit_count: hits,
            miss_count: misses,
            stale_serve_count: stale,
            hit_rate,
        }
    }

    /// Runs (or joins) the single-flight resolution for a subject.
    async fn resolve_shared(&self, subject: &SubjectId) -> Result<Option<Role>> {
        Self::wait_settled(self.spawn_flight(subject)).await
    }

    /// Registers the single-flight resolution for a subject, starting one
    /// on its own task if none is in flight.
    ///
    /// The flight task owns the settle-and-cleanup path, so a caller that
    /// gives up waiting (timeout, cancelled future) never strands the
    /// pending entry for everyone else.
    fn spawn_flight(&self, subject: &SubjectId) -> watch::Receiver<PendingSlot> {
        let (rx, leader) = match self.inner.pending.entry(subject.clone()) {
            Entry::Occupied(occupied) => (occupied.get().rx.clone(), None),
            Entry::Vacant(vacant) => {
                let id = self.inner.flight_seq.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                vacant.insert(Flight { id, rx: rx.clone() });
                (rx, Some((id, tx)))
            }
        };

        if let Some((id, tx)) = leader {
            let cache = self.clone();
            let subject = subject.clone();
            tokio::spawn(async move {
                let result = cache.run_resolution(&subject).await;
                if let Err(err) = &result {
                    tracing::debug!(subject = %subject, error = %err,
                        "role resolution flight failed");
                }
                // Only remove our own registration: an invalidation may
                // already have replaced it with a newer flight.
                cache
                    .inner
                    .pending
                    .remove_if(&subject, |_, flight| flight.id == id);
                let _ = tx.send(Some(result));
            });
        }

        rx
    }

    /// Resolves once and caches the outcome unless the session generation
    /// moved underneath it.
    async fn run_resolution(&self, subject: &SubjectId) -> Result<Option<Role>> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let result = self.inner.resolver.resolve(subject).await;

        if let Ok(role) = &result {
            if self.inner.generation.load(Ordering::SeqCst) == generation {
                let now = current_timestamp_ms();
                self.inner.entries.insert(
                    subject.clone(),
                    CacheEntry {
                        role: *role,
                        expires_at: now + self.inner.config.ttl.as_millis() as u64,
                    },
                );
                if self.inner.entries.len() > self.inner.config.max_entries {
                    self.evict_expired_entries();
                }
            } else {
                // An identity change happened while the queries were
                // outstanding.
                tracing::debug!(subject = %subject,
                    "discarding resolution completed after invalidation");
            }
        }

        result
    }

    /// Waits for an in-flight resolution another caller started.
    async fn wait_settled(mut rx: watch::Receiver<PendingSlot>) -> Result<Option<Role>> {
        loop {
            let settled = rx.borrow().clone();
            if let Some(result) = settled {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(AccessError::Internal {
                    message: "in-flight resolution dropped without settling".to_string(),
                });
            }
        }
    }

    /// Evicts expired entries from the cache
    fn evict_expired_entries(&self) {
        let now = current_timestamp_ms();
        self.inner.entries.retain(|_, entry| entry.expires_at > now);
    }
}
