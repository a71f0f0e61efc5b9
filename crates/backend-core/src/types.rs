use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-process session lifecycle state published to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    /// No restore attempt has resolved yet.
    Uninitialized,
    /// Restore/switch resolved without an authenticated engine handle.
    LoggedOut,
    /// One engine handle is open and authenticated for this account.
    LoggedIn {
        /// Local id of the active account record.
        account_id: String,
    },
}

/// Event stream emitted by the session lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session lifecycle transition.
    StateChanged {
        /// New lifecycle state.
        state: SessionState,
    },
    /// An account record was purged from the store.
    AccountRemoved {
        /// Local id of the removed record.
        account_id: String,
    },
}

/// One incremental change instruction for a conversation's timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimelineDiff<T> {
    /// Full replacement; the given order is authoritative.
    Reset(Vec<T>),
    /// Engine-side clear signal. Never wipes local history.
    Clear,
    /// Items the engine placed at the back.
    Append(Vec<T>),
    /// Item the engine placed at the front.
    Prepend(T),
    /// Replace-or-insert keyed by item id.
    UpdateByItemId(T),
    /// Replace-or-insert keyed by item id.
    UpsertByItemId(T),
    /// Remove every entry carrying this item id.
    RemoveByItemId(String),
}

impl<T> TimelineDiff<T> {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reset(_) => "reset",
            Self::Clear => "clear",
            Self::Append(_) => "append",
            Self::Prepend(_) => "prepend",
            Self::UpdateByItemId(_) => "update_by_item_id",
            Self::UpsertByItemId(_) => "upsert_by_item_id",
            Self::RemoveByItemId(_) => "remove_by_item_id",
        }
    }
}

/// Local send progress for an outgoing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendState {
    /// Queued locally, not yet acknowledged by the homeserver.
    Sending,
    /// Acknowledged by the homeserver.
    Sent,
    /// Sending failed and may be retried.
    Failed,
}

/// Timeline message payload delivered by the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineMessage {
    /// Engine-assigned positional id.
    pub item_id: String,
    /// Server event id, blank while the message is still pending.
    pub event_id: String,
    /// Client transaction id for locally sent messages.
    pub txn_id: Option<String>,
    /// Conversation this message belongs to.
    pub room_id: String,
    /// Sender user id.
    pub sender: String,
    /// Display-ready text body.
    pub body: String,
    /// Event timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: i64,
    /// Local send progress, `None` for remote messages.
    pub send_state: Option<SendState>,
    /// Root event id when the message belongs to a thread.
    pub thread_root_event_id: Option<String>,
    /// Whether the message body was replaced by an edit.
    pub is_edited: bool,
}

/// Borrowed content identity of a [`TimelineMessage`].
///
/// Variant order matches the `e:` < `i:` < `t:` prefixes of the rendered
/// form, so comparing keys agrees with comparing their strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StableKey<'a> {
    Event(&'a str),
    Item(&'a str),
    Txn(&'a str),
}

impl StableKey<'_> {
    /// Whether `rendered` is this key in `e:`/`t:`/`i:` form.
    pub fn matches(&self, rendered: &str) -> bool {
        let (prefix, id) = self.parts();
        rendered
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            == Some(id)
    }

    fn parts(&self) -> (&'static str, &str) {
        match *self {
            Self::Event(id) => ("e", id),
            Self::Item(id) => ("i", id),
            Self::Txn(id) => ("t", id),
        }
    }
}

impl fmt::Display for StableKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, id) = self.parts();
        write!(f, "{prefix}:{id}")
    }
}

impl TimelineMessage {
    /// Content identity: server event id, else transaction id, else item id.
    pub fn stable_key_ref(&self) -> StableKey<'_> {
        if !self.event_id.trim().is_empty() {
            return StableKey::Event(&self.event_id);
        }
        match self.txn_id.as_deref() {
            Some(txn_id) if !txn_id.trim().is_empty() => StableKey::Txn(txn_id),
            _ => StableKey::Item(&self.item_id),
        }
    }

    /// Rendered [`TimelineMessage::stable_key_ref`], e.g. `e:$event`.
    pub fn stable_key(&self) -> String {
        self.stable_key_ref().to_string()
    }

    /// Whether this message is a reply inside a thread (not the thread root).
    pub fn is_thread_reply(&self) -> bool {
        self.thread_root_event_id
            .as_deref()
            .is_some_and(|root| root != self.event_id)
    }
}

/// Persisted credentials and metadata for one logged-in identity.
///
/// Serialized with camelCase keys inside the `accountsJson` settings entry.
/// Unknown keys are ignored on read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    /// Local identity, also names the account's working directory.
    pub id: String,
    /// Matrix user id, for example `@alice:example.org`.
    pub user_id: String,
    /// Homeserver base URL.
    pub homeserver: String,
    /// Device id issued at login.
    pub device_id: String,
    /// Access token issued at login.
    pub access_token: String,
    /// Refresh token when the homeserver issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Cached display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Cached avatar URL.
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Wall-clock time the record was added, in milliseconds since Unix epoch.
    #[serde(default)]
    pub added_at_ms: i64,
}

impl AccountRecord {
    /// Build a fresh record with a generated local id.
    pub fn new(
        user_id: impl Into<String>,
        homeserver: impl Into<String>,
        device_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            homeserver: homeserver.into(),
            device_id: device_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            display_name: None,
            avatar_url: None,
            added_at_ms: now_ms(),
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
