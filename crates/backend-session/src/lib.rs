//! Session lifecycle over a pluggable sync engine.
//!
//! [`SessionManager`] owns at most one live [`EnginePort`] handle, persists
//! the account list through [`AccountStore`], and publishes the active
//! account, the stored accounts, and readiness to observers.
//! [`TimelineFeed`] folds one conversation's diff stream into a buffer.

pub mod account_store;
pub mod config;
pub mod feed;
pub mod logging;
pub mod manager;
pub mod port;

#[cfg(test)]
mod testing;

pub use account_store::{ACCOUNTS_KEY, ACTIVE_ACCOUNT_KEY, AccountStore, AccountStoreError};
pub use config::{ConfigError, SessionConfig};
pub use feed::{TimelineFeed, TimelineSnapshot};
pub use manager::SessionManager;
pub use port::{EnginePort, EnginePortFactory, SubscriptionToken, TimelineSubscription};
