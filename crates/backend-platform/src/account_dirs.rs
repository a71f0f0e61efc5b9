use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

const ACCOUNTS_DIR_NAME: &str = "accounts";

/// On-disk layout of per-account engine working directories.
///
/// Each account owns `<root>/accounts/<local id>`, removed wholesale when the
/// account is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDirs {
    root: PathBuf,
}

impl AccountDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory for one account.
    ///
    /// Ids that could escape the accounts directory are rejected.
    pub fn account_dir(&self, account_id: &str) -> io::Result<PathBuf> {
        if account_id.is_empty()
            || account_id == "."
            || account_id == ".."
            || account_id.contains(['/', '\\'])
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("account id '{account_id}' is not a valid directory name"),
            ));
        }
        Ok(self.root.join(ACCOUNTS_DIR_NAME).join(account_id))
    }

    /// Delete an account's working directory. A missing directory is not an error.
    pub async fn remove_account_dir(&self, account_id: &str) -> io::Result<()> {
        let dir = self.account_dir(account_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(dir = %dir.display(), "removed account working directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
