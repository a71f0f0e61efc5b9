//! In-process engine double and fixtures shared by the session tests.

use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use backend_core::{
    AccountRecord, BackendError, BackendErrorCategory, TimelineDiff, TimelineMessage,
};
use backend_platform::{InMemorySettingsStore, SettingsStore};
use tokio::sync::mpsc;

use crate::{
    account_store::{ACCOUNTS_KEY, ACTIVE_ACCOUNT_KEY},
    port::{EnginePort, EnginePortFactory, SubscriptionToken, TimelineSubscription},
};

/// Handle accounting across every engine a factory produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub created: usize,
    pub closed: usize,
    pub open_now: usize,
    pub max_open: usize,
    pub logouts: usize,
    pub inits: Vec<(String, Option<String>)>,
}

#[derive(Default)]
struct Behavior {
    rejected: HashSet<String>,
    failing: HashSet<String>,
    init_delay: Duration,
}

#[derive(Default)]
struct FakeShared {
    ledger: Mutex<Ledger>,
    behavior: Mutex<Behavior>,
    broken_teardown: AtomicBool,
}

impl FakeShared {
    fn opened(&self) {
        let mut ledger = self.ledger.lock().expect("ledger lock");
        ledger.created += 1;
        ledger.open_now += 1;
        ledger.max_open = ledger.max_open.max(ledger.open_now);
    }
}

/// Factory producing [`FakeEngine`] handles with scripted login outcomes.
#[derive(Default)]
pub struct FakeFactory {
    shared: Arc<FakeShared>,
    handles: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ledger(&self) -> Ledger {
        self.shared.ledger.lock().expect("ledger lock").clone()
    }

    /// Handles for this local id initialize but report logged out.
    pub fn reject_login(&self, local_id: &str) {
        self.behavior().rejected.insert(local_id.to_owned());
    }

    /// Handles for this local id fail to initialize.
    pub fn fail_init(&self, local_id: &str) {
        self.behavior().failing.insert(local_id.to_owned());
    }

    /// Close and logout error from now on; handles still count as closed.
    pub fn break_teardown(&self) {
        self.shared.broken_teardown.store(true, Ordering::SeqCst);
    }

    pub fn set_init_delay(&self, delay: Duration) {
        self.behavior().init_delay = delay;
    }

    /// The `idx`-th handle this factory produced.
    pub fn handle(&self, idx: usize) -> Arc<FakeEngine> {
        Arc::clone(&self.handles.lock().expect("handles lock")[idx])
    }

    /// A handle as produced by an interactive login: already authenticated.
    pub fn logged_in_handle(&self) -> Arc<FakeEngine> {
        let engine = self.spawn_engine();
        engine.logged_in.store(true, Ordering::SeqCst);
        engine
    }

    fn spawn_engine(&self) -> Arc<FakeEngine> {
        self.shared.opened();
        let engine = Arc::new(FakeEngine::new(Arc::clone(&self.shared)));
        self.handles
            .lock()
            .expect("handles lock")
            .push(Arc::clone(&engine));
        engine
    }

    fn behavior(&self) -> std::sync::MutexGuard<'_, Behavior> {
        self.shared.behavior.lock().expect("behavior lock")
    }
}

impl EnginePortFactory for FakeFactory {
    fn create(&self) -> Arc<dyn EnginePort> {
        self.spawn_engine()
    }
}

type DiffSender = mpsc::Sender<TimelineDiff<TimelineMessage>>;

/// Scripted engine handle.
pub struct FakeEngine {
    shared: Arc<FakeShared>,
    logged_in: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    next_token: AtomicU64,
    observers: Mutex<Vec<(SubscriptionToken, String, DiffSender)>>,
    unobserved: Mutex<Vec<SubscriptionToken>>,
    fail_observe: AtomicBool,
}

impl FakeEngine {
    fn new(shared: Arc<FakeShared>) -> Self {
        Self {
            shared,
            logged_in: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            next_token: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
            unobserved: Mutex::new(Vec::new()),
            fail_observe: AtomicBool::new(false),
        }
    }

    /// Standalone handle for timeline tests that do not need a factory.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::new(Arc::default()))
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn fail_observe(&self) {
        self.fail_observe.store(true, Ordering::SeqCst);
    }

    /// Engine-side sender of the most recent subscription to `conversation_id`.
    pub fn diff_sender(&self, conversation_id: &str) -> DiffSender {
        self.observers
            .lock()
            .expect("observers lock")
            .iter()
            .rev()
            .find(|(_, room, _)| room == conversation_id)
            .map(|(_, _, sender)| sender.clone())
            .expect("conversation should be observed")
    }

    /// Drop every engine-side sender, ending the open streams.
    pub fn end_streams(&self) {
        self.observers.lock().expect("observers lock").clear();
    }

    pub fn unobserved(&self) -> Vec<SubscriptionToken> {
        self.unobserved.lock().expect("unobserved lock").clone()
    }
}

#[async_trait]
impl EnginePort for FakeEngine {
    async fn init(&self, homeserver: &str, local_id: Option<&str>) -> Result<(), BackendError> {
        let (delay, failing, rejected) = {
            let behavior = self.shared.behavior.lock().expect("behavior lock");
            let id = local_id.unwrap_or_default();
            (
                behavior.init_delay,
                behavior.failing.contains(id),
                behavior.rejected.contains(id),
            )
        };
        self.shared
            .ledger
            .lock()
            .expect("ledger lock")
            .inits
            .push((homeserver.to_owned(), local_id.map(str::to_owned)));

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(BackendError::engine_io("init", "store is locked"));
        }
        self.logged_in.store(!rejected, Ordering::SeqCst);
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut ledger = self.shared.ledger.lock().expect("ledger lock");
            ledger.closed += 1;
            ledger.open_now = ledger.open_now.saturating_sub(1);
        }
        self.observers.lock().expect("observers lock").clear();
        if self.shared.broken_teardown.load(Ordering::SeqCst) {
            return Err(BackendError::engine_io("close", "socket already gone"));
        }
        Ok(())
    }

    async fn logout(&self) -> Result<bool, BackendError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.ledger.lock().expect("ledger lock").logouts += 1;
        if self.shared.broken_teardown.load(Ordering::SeqCst) {
            return Err(BackendError::engine_io("logout", "homeserver unreachable"));
        }
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(true)
    }

    async fn observe_timeline(
        &self,
        conversation_id: &str,
    ) -> Result<TimelineSubscription, BackendError> {
        if self.fail_observe.load(Ordering::SeqCst) {
            return Err(BackendError::new(
                BackendErrorCategory::RateLimited,
                "rate_limited",
                "too many timeline subscriptions",
            )
            .with_retry_after(Duration::from_millis(1_500)));
        }
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let (sender, subscription) = TimelineSubscription::channel(token, 8);
        self.observers.lock().expect("observers lock").push((
            token,
            conversation_id.to_owned(),
            sender,
        ));
        Ok(subscription)
    }

    async fn unobserve_timeline(&self, token: SubscriptionToken) -> Result<(), BackendError> {
        self.unobserved.lock().expect("unobserved lock").push(token);
        self.observers
            .lock()
            .expect("observers lock")
            .retain(|(existing, _, _)| *existing != token);
        Ok(())
    }
}

/// Stored record whose homeserver is `https://hs-{id}`.
pub fn account(id: &str, user_id: &str) -> AccountRecord {
    AccountRecord {
        id: id.to_owned(),
        user_id: user_id.to_owned(),
        homeserver: format!("https://hs-{id}"),
        device_id: format!("DEV-{id}"),
        access_token: format!("token-{id}"),
        refresh_token: None,
        display_name: None,
        avatar_url: None,
        added_at_ms: 1_731_000_000_000,
    }
}

pub fn seed_store(
    settings: &InMemorySettingsStore,
    accounts: &[AccountRecord],
    active_account_id: Option<&str>,
) {
    let encoded = serde_json::to_string(accounts).expect("accounts encode");
    settings.set(ACCOUNTS_KEY, &encoded).expect("seed accounts");
    if let Some(id) = active_account_id {
        settings.set(ACTIVE_ACCOUNT_KEY, id).expect("seed active id");
    }
}

pub fn unique_root(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!("backend-session-{label}-{nanos}"))
}
