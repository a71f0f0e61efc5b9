//! Owns at most one live engine handle and serializes every session
//! transition behind a single lock.

use std::{collections::HashSet, future::Future, sync::Arc};

use backend_core::{
    AccountRecord, BackendError, SessionChannels, SessionEvent, SessionEventStream,
    SessionStateMachine,
};
use backend_platform::{AccountDirs, JsonFileSettingsStore, SettingsStore, SettingsStoreError};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{debug, info, warn};

use crate::{
    account_store::AccountStore,
    config::SessionConfig,
    feed::TimelineFeed,
    port::{EnginePort, EnginePortFactory},
};

/// Handle to the session lifecycle manager.
///
/// Cloning is cheap and every clone drives the same state. Transitions run
/// on a spawned task: a caller that stops awaiting (for example behind a
/// timeout) does not interrupt the transition, which still completes under
/// the lock.
pub struct SessionManager<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<S> {
    factory: Arc<dyn EnginePortFactory>,
    dirs: AccountDirs,
    channels: SessionChannels,
    active_port: watch::Sender<Option<Arc<dyn EnginePort>>>,
    inner: Mutex<Inner<S>>,
}

struct Inner<S> {
    store: AccountStore<S>,
    active: Option<AccountRecord>,
    state: SessionStateMachine,
}

impl<S: SettingsStore + Clone + 'static> SessionManager<S> {
    pub fn new(
        factory: Arc<dyn EnginePortFactory>,
        settings: S,
        dirs: AccountDirs,
        event_buffer: usize,
    ) -> Self {
        let (active_port, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                factory,
                dirs,
                channels: SessionChannels::new(event_buffer),
                active_port,
                inner: Mutex::new(Inner {
                    store: AccountStore::new(settings),
                    active: None,
                    state: SessionStateMachine::default(),
                }),
            }),
        }
    }

    /// Restore the previously active account (or the first stored one).
    ///
    /// Returns whether a session is logged in afterwards. Readiness is
    /// published either way.
    pub async fn init_from_disk(&self) -> bool {
        self.run_locked("init_from_disk", |shared| async move {
            let mut inner = shared.inner.lock().await;
            shared.init_from_disk(&mut inner).await
        })
        .await
    }

    /// Close the active handle (best-effort) and log in as `account`.
    ///
    /// Only stored accounts can be switched to; an unknown record is refused
    /// and the current session is left untouched.
    pub async fn switch_to(&self, account: AccountRecord) -> bool {
        self.run_locked("switch_to", |shared| async move {
            let mut inner = shared.lock_loaded().await;
            let Some(stored) = inner.store.account_by_id(&account.id).cloned() else {
                warn!(account_id = %account.id, "refusing to switch to an account that is not stored");
                shared.settle(&mut inner, None);
                return false;
            };
            shared.teardown_active(&mut inner, false).await;
            shared.init_account(&mut inner, stored).await
        })
        .await
    }

    /// Adopt an already-authenticated handle produced by an interactive login.
    pub async fn add_logged_in_account(&self, account: AccountRecord, port: Arc<dyn EnginePort>) {
        self.run_locked("add_logged_in_account", |shared| async move {
            let mut inner = shared.lock_loaded().await;
            shared.add_logged_in_account(&mut inner, account, port).await;
        })
        .await
    }

    /// Log out the active account, forget it, and fail over to another one.
    pub async fn logout_current(&self) {
        self.run_locked("logout_current", |shared| async move {
            let mut inner = shared.lock_loaded().await;
            let Some(current) = inner.active.clone() else {
                debug!("logout requested without an active account");
                shared.settle(&mut inner, None);
                return;
            };
            shared.teardown_active(&mut inner, true).await;
            shared.purge_account(&mut inner, &current.id).await;
            shared.fail_over(&mut inner).await;
        })
        .await
    }

    /// Forget an account. When it is the active one, log it out first and
    /// fail over to another stored account.
    pub async fn remove_account(&self, account_id: impl Into<String>) {
        let account_id = account_id.into();
        self.run_locked("remove_account", |shared| async move {
            let mut inner = shared.lock_loaded().await;
            let was_active = inner
                .active
                .as_ref()
                .is_some_and(|active| active.id == account_id);

            if was_active {
                shared.teardown_active(&mut inner, true).await;
            }
            shared.purge_account(&mut inner, &account_id).await;
            if was_active {
                shared.fail_over(&mut inner).await;
            } else {
                shared.settle(&mut inner, None);
            }
        })
        .await
    }

    /// Refresh cached metadata (display name, avatar, tokens) of a stored record.
    pub async fn update_account(&self, account: AccountRecord) -> bool {
        self.run_locked("update_account", |shared| async move {
            let mut inner = shared.lock_loaded().await;
            let updated = match inner.store.update_account(account.clone()).await {
                Ok(updated) => updated,
                Err(err) => {
                    warn!(account_id = %account.id, error = %err, "failed persisting account update");
                    inner.store.account_by_id(&account.id).is_some()
                }
            };
            if updated
                && inner
                    .active
                    .as_ref()
                    .is_some_and(|active| active.id == account.id)
            {
                inner.active = Some(account.clone());
                shared.channels.publish_active_account(Some(account));
            }
            shared.settle(&mut inner, None);
            updated
        })
        .await
    }

    /// The active engine handle.
    ///
    /// Fails immediately with `no_active_session` when no account is active;
    /// calling this before a restore or switch succeeded is a caller bug.
    pub fn port(&self) -> Result<Arc<dyn EnginePort>, BackendError> {
        self.port_or_none()
            .ok_or_else(BackendError::no_active_session)
    }

    /// Start consuming one conversation's timeline on the active handle.
    pub async fn open_timeline(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<TimelineFeed, BackendError> {
        TimelineFeed::open(self.port()?, conversation_id).await
    }

    pub fn port_or_none(&self) -> Option<Arc<dyn EnginePort>> {
        self.shared.active_port.borrow().clone()
    }

    /// Whether a handle is active and reports itself logged in.
    pub fn has_active_client(&self) -> bool {
        self.port_or_none().is_some_and(|port| port.is_logged_in())
    }

    pub fn active_account(&self) -> Option<AccountRecord> {
        self.shared.channels.active_account()
    }

    /// Stored accounts as of the last completed transition.
    pub fn accounts(&self) -> Vec<AccountRecord> {
        self.shared.channels.accounts()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.channels.is_ready()
    }

    pub fn subscribe_active_account(&self) -> watch::Receiver<Option<AccountRecord>> {
        self.shared.channels.subscribe_active_account()
    }

    pub fn subscribe_accounts(&self) -> watch::Receiver<Vec<AccountRecord>> {
        self.shared.channels.subscribe_accounts()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.shared.channels.subscribe_ready()
    }

    pub fn subscribe_events(&self) -> SessionEventStream {
        self.shared.channels.subscribe()
    }

    async fn run_locked<F, Fut, R>(&self, operation: &'static str, body: F) -> R
    where
        F: FnOnce(Arc<Shared<S>>) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Default + Send + 'static,
    {
        debug!(operation, "session transition requested");
        let task = tokio::spawn(body(Arc::clone(&self.shared)));
        match task.await {
            Ok(value) => value,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(operation, error = %err, "session transition task was cancelled");
                R::default()
            }
        }
    }
}

impl SessionManager<JsonFileSettingsStore> {
    /// Manager persisting to the configured settings file and data directory.
    pub fn from_config(
        factory: Arc<dyn EnginePortFactory>,
        config: &SessionConfig,
    ) -> Result<Self, SettingsStoreError> {
        let settings = config.open_settings()?;
        Ok(Self::new(
            factory,
            settings,
            config.account_dirs(),
            config.session_event_buffer,
        ))
    }
}

impl<S: SettingsStore + Clone + 'static> Shared<S> {
    async fn lock_loaded(&self) -> MutexGuard<'_, Inner<S>> {
        let mut inner = self.inner.lock().await;
        if let Err(err) = inner.store.ensure_loaded().await {
            warn!(error = %err, "failed loading stored accounts");
        }
        inner
    }

    async fn init_from_disk(&self, inner: &mut Inner<S>) -> bool {
        if self.active_port.borrow().is_some() {
            self.resolve(inner, None);
            return true;
        }

        if let Err(err) = inner.store.load().await {
            warn!(error = %err, "failed loading stored accounts");
        }

        let candidate = inner
            .store
            .active_account()
            .or_else(|| inner.store.accounts().first())
            .cloned();

        match candidate {
            Some(account) => self.init_account(inner, account).await,
            None => {
                info!("no stored accounts; session stays logged out");
                let event = inner.state.logged_out();
                self.resolve(inner, event);
                false
            }
        }
    }

    async fn add_logged_in_account(
        &self,
        inner: &mut Inner<S>,
        account: AccountRecord,
        port: Arc<dyn EnginePort>,
    ) {
        self.teardown_active(inner, false).await;

        // One stored record per logical identity.
        let superseded = inner
            .store
            .account_by_user_id(&account.user_id)
            .filter(|existing| existing.id != account.id)
            .map(|existing| existing.id.clone());
        if let Some(old_id) = superseded {
            info!(old_id = %old_id, new_id = %account.id, "replacing re-logged-in account");
            self.purge_account(inner, &old_id).await;
        }

        if let Err(err) = inner.store.add_account(account.clone()).await {
            warn!(account_id = %account.id, error = %err, "failed persisting new account");
        }
        self.activate(inner, account, port).await;
    }

    /// Open a fresh handle for `account` and make it active if it logs in.
    ///
    /// A handle that initializes but is not logged in marks the record as
    /// stale and purges it. An init error only discards the handle.
    async fn init_account(&self, inner: &mut Inner<S>, account: AccountRecord) -> bool {
        self.teardown_active(inner, false).await;

        let port = self.factory.create();
        let outcome = match port.init(&account.homeserver, Some(&account.id)).await {
            Ok(()) => Ok(port.is_logged_in()),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(true) => {
                info!(account_id = %account.id, user_id = %account.user_id, "session restored");
                self.activate(inner, account, port).await;
                true
            }
            Ok(false) => {
                info!(account_id = %account.id, "stored session is no longer logged in; removing it");
                close_best_effort(port.as_ref()).await;
                self.purge_account(inner, &account.id).await;
                let event = inner.state.logged_out();
                self.resolve(inner, event);
                false
            }
            Err(err) => {
                warn!(account_id = %account.id, error = %err, "engine init failed");
                close_best_effort(port.as_ref()).await;
                let event = inner.state.logged_out();
                self.resolve(inner, event);
                false
            }
        }
    }

    /// Try remaining accounts in stored order until one logs in.
    async fn fail_over(&self, inner: &mut Inner<S>) {
        let mut attempted = HashSet::new();
        loop {
            let next = inner
                .store
                .accounts()
                .iter()
                .find(|account| !attempted.contains(&account.id))
                .cloned();
            let Some(next) = next else {
                info!("no account left to fail over to; session is logged out");
                let event = inner.state.logged_out();
                self.resolve(inner, event);
                return;
            };

            attempted.insert(next.id.clone());
            if self.init_account(inner, next).await {
                return;
            }
        }
    }

    async fn activate(
        &self,
        inner: &mut Inner<S>,
        account: AccountRecord,
        port: Arc<dyn EnginePort>,
    ) {
        if let Err(err) = inner.store.set_active_account_id(Some(&account.id)).await {
            warn!(account_id = %account.id, error = %err, "failed persisting active account id");
        }
        self.active_port.send_replace(Some(port));
        inner.active = Some(account.clone());
        let event = inner.state.logged_in(account.id.clone());
        self.channels.publish_active_account(Some(account));
        self.resolve(inner, event);
    }

    /// Drop the active handle. Engine failures never block the teardown.
    async fn teardown_active(&self, inner: &mut Inner<S>, remote_logout: bool) {
        let previous = self.active_port.send_replace(None);
        inner.active = None;
        self.channels.publish_active_account(None);

        let Some(port) = previous else {
            return;
        };
        if remote_logout {
            match port.logout().await {
                Ok(true) => {}
                Ok(false) => warn!("engine refused remote logout"),
                Err(err) => warn!(error = %err, "remote logout failed; continuing teardown"),
            }
        }
        close_best_effort(port.as_ref()).await;
    }

    /// Remove the record and its working directory.
    async fn purge_account(&self, inner: &mut Inner<S>, account_id: &str) {
        match inner.store.remove_account(account_id).await {
            Ok(Some(_)) => self.channels.emit(SessionEvent::AccountRemoved {
                account_id: account_id.to_owned(),
            }),
            Ok(None) => debug!(account_id, "account was not stored"),
            Err(err) => {
                warn!(account_id, error = %err, "failed persisting account removal");
                self.channels.emit(SessionEvent::AccountRemoved {
                    account_id: account_id.to_owned(),
                });
            }
        }

        if let Err(err) = self.dirs.remove_account_dir(account_id).await {
            warn!(account_id, error = %err, "failed deleting account working directory");
        }
    }

    /// Publish the stored accounts and an optional lifecycle event.
    fn settle(&self, inner: &mut Inner<S>, event: Option<SessionEvent>) {
        self.channels.publish_accounts(inner.store.accounts());
        if let Some(event) = event {
            self.channels.emit(event);
        }
    }

    /// Settle a transition that decided the session, and latch readiness.
    fn resolve(&self, inner: &mut Inner<S>, event: Option<SessionEvent>) {
        self.settle(inner, event);
        self.channels.publish_ready();
    }
}

async fn close_best_effort(port: &dyn EnginePort) {
    if let Err(err) = port.close().await {
        warn!(error = %err, "closing engine handle failed; handle discarded anyway");
    }
}
