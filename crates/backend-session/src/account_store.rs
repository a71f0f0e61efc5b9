//! Persisted list of logged-in accounts plus the active-account pointer.

use backend_core::AccountRecord;
use backend_platform::{SettingsStore, SettingsStoreError};
use thiserror::Error;
use tokio::task;
use tracing::warn;

/// Settings key holding the JSON array of account records.
pub const ACCOUNTS_KEY: &str = "accountsJson";
/// Settings key holding the active record's local id.
pub const ACTIVE_ACCOUNT_KEY: &str = "activeAccountId";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountStoreError {
    #[error(transparent)]
    Settings(#[from] SettingsStoreError),
    #[error("failed encoding account list: {0}")]
    Encode(String),
    #[error("settings worker failed: {0}")]
    Worker(String),
}

/// Repository over the two account settings keys.
///
/// Mutations update the in-memory view first and then persist it, so the
/// process keeps a coherent view even when a write fails; the write error is
/// still returned. Settings I/O runs on the blocking pool.
pub struct AccountStore<S> {
    settings: S,
    accounts: Vec<AccountRecord>,
    active_account_id: Option<String>,
    loaded: bool,
}

impl<S: SettingsStore + Clone + 'static> AccountStore<S> {
    /// Create an empty store; call [`AccountStore::load`] to read persisted state.
    pub fn new(settings: S) -> Self {
        Self {
            settings,
            accounts: Vec::new(),
            active_account_id: None,
            loaded: false,
        }
    }

    /// Reload accounts and the active id from settings.
    ///
    /// A malformed account list is logged and treated as empty.
    pub async fn load(&mut self) -> Result<(), AccountStoreError> {
        let (raw_accounts, active_account_id) = self
            .with_settings(|settings| {
                Ok((settings.get(ACCOUNTS_KEY)?, settings.get(ACTIVE_ACCOUNT_KEY)?))
            })
            .await?;
        let active_account_id = active_account_id.filter(|id| !id.trim().is_empty());

        self.accounts = decode_accounts(raw_accounts.as_deref());
        self.active_account_id = active_account_id;
        self.loaded = true;
        Ok(())
    }

    /// Load persisted state unless it was already loaded.
    ///
    /// Mutating an unloaded store would overwrite the persisted list.
    pub async fn ensure_loaded(&mut self) -> Result<(), AccountStoreError> {
        if self.loaded {
            return Ok(());
        }
        self.load().await
    }

    pub fn accounts(&self) -> &[AccountRecord] {
        &self.accounts
    }

    pub fn has_accounts(&self) -> bool {
        !self.accounts.is_empty()
    }

    pub fn active_account_id(&self) -> Option<&str> {
        self.active_account_id.as_deref()
    }

    /// The record the active id points at, if it still exists.
    pub fn active_account(&self) -> Option<&AccountRecord> {
        let id = self.active_account_id.as_deref()?;
        self.account_by_id(id)
    }

    pub fn account_by_id(&self, id: &str) -> Option<&AccountRecord> {
        self.accounts.iter().find(|account| account.id == id)
    }

    pub fn account_by_user_id(&self, user_id: &str) -> Option<&AccountRecord> {
        self.accounts
            .iter()
            .find(|account| account.user_id == user_id)
    }

    pub async fn set_active_account_id(
        &mut self,
        id: Option<&str>,
    ) -> Result<(), AccountStoreError> {
        self.active_account_id = id.map(str::to_owned);
        let id = self.active_account_id.clone();
        self.with_settings(move |settings| match id {
            Some(id) => settings.set(ACTIVE_ACCOUNT_KEY, &id),
            None => settings.remove(ACTIVE_ACCOUNT_KEY),
        })
        .await
    }

    /// Add a record, replacing any record for the same user id.
    pub async fn add_account(&mut self, account: AccountRecord) -> Result<(), AccountStoreError> {
        self.accounts
            .retain(|existing| existing.user_id != account.user_id);
        self.accounts.push(account);
        self.save_accounts().await
    }

    /// Replace the record with the same local id. Returns `false` when absent.
    pub async fn update_account(
        &mut self,
        account: AccountRecord,
    ) -> Result<bool, AccountStoreError> {
        let Some(slot) = self
            .accounts
            .iter_mut()
            .find(|existing| existing.id == account.id)
        else {
            return Ok(false);
        };
        *slot = account;
        self.save_accounts().await?;
        Ok(true)
    }

    /// Remove a record by local id, clearing the active id if it pointed there.
    ///
    /// Returns the removed record.
    pub async fn remove_account(
        &mut self,
        account_id: &str,
    ) -> Result<Option<AccountRecord>, AccountStoreError> {
        let position = self
            .accounts
            .iter()
            .position(|account| account.id == account_id);
        let removed = position.map(|idx| self.accounts.remove(idx));

        if removed.is_some() {
            self.save_accounts().await?;
        }
        if self.active_account_id.as_deref() == Some(account_id) {
            self.set_active_account_id(None).await?;
        }
        Ok(removed)
    }

    async fn save_accounts(&self) -> Result<(), AccountStoreError> {
        let encoded = serde_json::to_string(&self.accounts)
            .map_err(|err| AccountStoreError::Encode(err.to_string()))?;
        self.with_settings(move |settings| settings.set(ACCOUNTS_KEY, &encoded))
            .await
    }

    async fn with_settings<R, F>(&self, op: F) -> Result<R, AccountStoreError>
    where
        F: FnOnce(&S) -> Result<R, SettingsStoreError> + Send + 'static,
        R: Send + 'static,
    {
        let settings = self.settings.clone();
        let outcome = task::spawn_blocking(move || op(&settings))
            .await
            .map_err(|err| AccountStoreError::Worker(err.to_string()))?;
        Ok(outcome?)
    }
}

fn decode_accounts(raw: Option<&str>) -> Vec<AccountRecord> {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<AccountRecord>>(raw) {
        Ok(accounts) => accounts,
        Err(err) => {
            warn!(error = %err, "failed decoding persisted accounts; starting with none");
            Vec::new()
        }
    }
}
