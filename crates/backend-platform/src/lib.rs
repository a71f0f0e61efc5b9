//! Platform persistence for the session layer: key-value settings and the
//! per-account working-directory layout.

pub mod account_dirs;
pub mod settings;

pub use account_dirs::AccountDirs;
pub use settings::{
    InMemorySettingsStore, JsonFileSettingsStore, SettingsStore, SettingsStoreError,
};
