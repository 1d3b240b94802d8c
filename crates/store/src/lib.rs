//! Local persistence: encrypted per-entity credentials and the intent ledger.

pub mod credentials;
pub mod crypto;
pub mod error;
pub mod ledger;

pub use credentials::{CredentialStore, EncryptedCredentialStore, InMemoryCredentialStore, SavedCredentials};
pub use error::StoreError;
pub use ledger::{InMemoryIntentLedger, JsonIntentLedger};
