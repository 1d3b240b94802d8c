use std::time::Duration;

use finsync_core::{BrowserError, EntityKey, LedgerError};
use finsync_keypad::KeypadError;
use finsync_store::StoreError;
use thiserror::Error;

/// Errors raised while syncing one entity. Whether a failure is retried is
/// decided from its message by [`crate::classify`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No saved credentials for {0}")]
    MissingCredentials(EntityKey),

    /// Stored credentials exist but cannot be decrypted or parsed.
    #[error("Invalid credentials for {0}")]
    InvalidCredentials(EntityKey),

    #[error("No accounts found for {0}")]
    NoAccounts(EntityKey),

    #[error("Unsupported institution: {0}")]
    Unsupported(EntityKey),

    #[error("Password entry incomplete: {failed} of {total} characters failed")]
    Typing { failed: usize, total: usize },

    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Keypad error: {0}")]
    Keypad(#[from] KeypadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Raised by institution automation and storage collaborators.
    #[error("{0}")]
    Automation(String),
}
