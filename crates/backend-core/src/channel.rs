use tokio::sync::{broadcast, watch};

use crate::types::{AccountRecord, SessionEvent};

/// Broadcast event stream type used by session subscribers.
pub type SessionEventStream = broadcast::Receiver<SessionEvent>;

/// Observable session state published by the lifecycle manager.
///
/// Accounts, active account and readiness are level-triggered (`watch`);
/// lifecycle events are edge-triggered (`broadcast`).
#[derive(Clone, Debug)]
pub struct SessionChannels {
    accounts_tx: watch::Sender<Vec<AccountRecord>>,
    active_account_tx: watch::Sender<Option<AccountRecord>>,
    ready_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a channel set with the given event buffer (`>= 1`).
    pub fn new(event_buffer: usize) -> Self {
        let (accounts_tx, _) = watch::channel(Vec::new());
        let (active_account_tx, _) = watch::channel(None);
        let (ready_tx, _) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        Self {
            accounts_tx,
            active_account_tx,
            ready_tx,
            event_tx,
        }
    }

    /// Latest published stored-account list.
    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.accounts_tx.borrow().clone()
    }

    /// Latest published active account.
    pub fn active_account(&self) -> Option<AccountRecord> {
        self.active_account_tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub fn subscribe_accounts(&self) -> watch::Receiver<Vec<AccountRecord>> {
        self.accounts_tx.subscribe()
    }

    pub fn subscribe_active_account(&self) -> watch::Receiver<Option<AccountRecord>> {
        self.active_account_tx.subscribe()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready_tx.subscribe()
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> SessionEventStream {
        self.event_tx.subscribe()
    }

    /// Publish the account list, notifying only when it changed.
    pub fn publish_accounts(&self, accounts: &[AccountRecord]) {
        self.accounts_tx.send_if_modified(|current| {
            if current.as_slice() == accounts {
                return false;
            }
            *current = accounts.to_vec();
            true
        });
    }

    pub fn publish_active_account(&self, account: Option<AccountRecord>) {
        self.active_account_tx.send_replace(account);
    }

    /// Readiness only ever moves to `true`.
    pub fn publish_ready(&self) {
        self.ready_tx.send_if_modified(|ready| {
            let changed = !*ready;
            *ready = true;
            changed
        });
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}
