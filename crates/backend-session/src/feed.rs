//! Per-conversation consumer of an engine timeline subscription.

use std::sync::Arc;

use backend_core::{BackendError, TimelineBuffer, TimelineDiff, TimelineMessage};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::port::{EnginePort, SubscriptionToken};

/// Published state of one conversation timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineSnapshot {
    /// Entries in display order.
    pub items: Vec<TimelineMessage>,
    /// Entries touched by the last applied diff.
    pub delta: Vec<TimelineMessage>,
    /// Last applied diff was a `Reset`.
    pub reset: bool,
    /// Last applied diff was an engine `Clear`; `items` were kept.
    pub cleared: bool,
    pub has_snapshot: bool,
    /// Increments with every published snapshot.
    pub revision: u64,
}

/// Folds an engine diff stream into a [`TimelineBuffer`] on a background task.
///
/// The subscription is released with `unobserve_timeline` exactly once, when
/// the feed is stopped or dropped, or when the engine ends the stream.
pub struct TimelineFeed {
    conversation_id: String,
    token: SubscriptionToken,
    snapshot_rx: watch::Receiver<TimelineSnapshot>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TimelineFeed {
    pub async fn open(
        port: Arc<dyn EnginePort>,
        conversation_id: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let conversation_id = conversation_id.into();
        let subscription = port.observe_timeline(&conversation_id).await?;
        let token = subscription.token;
        debug!(conversation_id = %conversation_id, token = %token, "timeline observed");

        let (snapshot_tx, snapshot_rx) = watch::channel(TimelineSnapshot::default());
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_feed(
            port,
            conversation_id.clone(),
            token,
            subscription.diffs,
            snapshot_tx,
            stop.child_token(),
        ));

        Ok(Self {
            conversation_id,
            token,
            snapshot_rx,
            stop,
            task: Some(task),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> TimelineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimelineSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop consuming and wait until the subscription has been released.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(conversation_id = %self.conversation_id, error = %err, "timeline feed task failed");
        }
    }
}

impl Drop for TimelineFeed {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_feed(
    port: Arc<dyn EnginePort>,
    conversation_id: String,
    token: SubscriptionToken,
    mut diffs: mpsc::Receiver<TimelineDiff<TimelineMessage>>,
    snapshot_tx: watch::Sender<TimelineSnapshot>,
    stop: CancellationToken,
) {
    let mut buffer = TimelineBuffer::new();
    let mut revision = 0_u64;
    let mut first = true;

    loop {
        let diff = tokio::select! {
            _ = stop.cancelled() => break,
            diff = diffs.recv() => match diff {
                Some(diff) => diff,
                None => {
                    debug!(conversation_id = %conversation_id, "timeline stream ended");
                    break;
                }
            },
        };

        if first {
            first = false;
            if !matches!(diff, TimelineDiff::Reset(_)) {
                warn!(
                    conversation_id = %conversation_id,
                    kind = diff.kind(),
                    "timeline subscription did not start with a reset"
                );
            }
        }

        let kind = diff.kind();
        let change = buffer.apply(diff);
        if change.delta.is_empty() && !change.reset && !change.cleared {
            debug!(conversation_id = %conversation_id, kind, "timeline diff changed nothing");
            continue;
        }

        revision += 1;
        snapshot_tx.send_replace(TimelineSnapshot {
            items: buffer.items().to_vec(),
            delta: change.delta,
            reset: change.reset,
            cleared: change.cleared,
            has_snapshot: buffer.has_snapshot(),
            revision,
        });
    }

    if let Err(err) = port.unobserve_timeline(token).await {
        warn!(conversation_id = %conversation_id, token = %token, error = %err, "failed releasing timeline subscription");
    }
}
