//! Identity-lifecycle events and cache wiring
//!
//! The session provider is an external collaborator; this module models the
//! events it emits and subscribes the role cache to them. Invalidation is
//! driven only by these declared events — never by ad hoc calls scattered
//! through UI code.

use crate::cache::RoleCache;
use crate::store::AuthorityStore;
use crate::types::SubjectId;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Identity-lifecycle event emitted by the session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(SubjectId),
    SignedOut,
    TokenRefreshed(SubjectId),
}

/// Read surface of the external session provider.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns the currently authenticated subject, if any.
    async fn current_subject(&self) -> Option<SubjectId>;
}

/// In-memory session provider for the dev profile and tests.
#[derive(Default)]
pub struct MemorySessionProvider {
    current: RwLock<Option<SubjectId>>,
}

impl MemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sign_in(&self, subject: SubjectId) {
        *self.current.write().await = Some(subject);
    }

    pub async fn sign_out(&self) {
        *self.current.write().await = None;
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn current_subject(&self) -> Option<SubjectId> {
        self.current.read().await.clone()
    }
}

/// Subscribes a cache to a stream of session events.
///
/// Runs until the event channel closes. If the subscriber lags and events
/// are dropped, the missed events may have included a sign-out, so the whole
/// cache is invalidated to fail closed.
pub fn spawn_session_listener<S: AuthorityStore + 'static>(
    cache: RoleCache<S>,
    mut events: broadcast::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => cache.handle_session_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session event stream lagged, invalidating all");
                    cache.invalidate_all();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
