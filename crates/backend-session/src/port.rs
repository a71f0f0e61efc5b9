use std::{fmt, sync::Arc};

use async_trait::async_trait;
use backend_core::{BackendError, TimelineDiff, TimelineMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Engine-issued handle for one timeline subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Diff stream for one conversation.
///
/// The engine delivers diffs in order through a bounded channel, so a slow
/// consumer applies back-pressure instead of losing diffs. The first diff on
/// a fresh subscription is a `Reset`.
#[derive(Debug)]
pub struct TimelineSubscription {
    pub token: SubscriptionToken,
    pub diffs: mpsc::Receiver<TimelineDiff<TimelineMessage>>,
}

impl TimelineSubscription {
    /// Build a subscription plus the engine-side sender (`capacity >= 1`).
    pub fn channel(
        token: SubscriptionToken,
        capacity: usize,
    ) -> (mpsc::Sender<TimelineDiff<TimelineMessage>>, Self) {
        let (diff_tx, diffs) = mpsc::channel(capacity.max(1));
        (diff_tx, Self { token, diffs })
    }
}

/// Capability surface of one sync-engine connection.
///
/// A handle is exclusively owned by the session manager while active; other
/// components reach it only through the manager's published port.
#[async_trait]
pub trait EnginePort: Send + Sync {
    /// Bind the handle to a homeserver and, for stored accounts, the local
    /// account id whose working directory holds the engine state.
    async fn init(&self, homeserver: &str, local_id: Option<&str>) -> Result<(), BackendError>;

    fn is_logged_in(&self) -> bool;

    async fn close(&self) -> Result<(), BackendError>;

    /// Remote logout. `Ok(false)` means the server refused without an I/O error.
    async fn logout(&self) -> Result<bool, BackendError>;

    async fn observe_timeline(
        &self,
        conversation_id: &str,
    ) -> Result<TimelineSubscription, BackendError>;

    async fn unobserve_timeline(&self, token: SubscriptionToken) -> Result<(), BackendError>;
}

/// Creates fresh, unauthenticated engine handles.
pub trait EnginePortFactory: Send + Sync {
    fn create(&self) -> Arc<dyn EnginePort>;
}

impl<F> EnginePortFactory for F
where
    F: Fn() -> Arc<dyn EnginePort> + Send + Sync,
{
    fn create(&self) -> Arc<dyn EnginePort> {
        self()
    }
}
