//! Per-entity saved login credentials, grouped by namespace (entity kind).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crypto::{decrypt_secret, encrypt_secret, load_or_generate_key};
use crate::error::StoreError;

/// Decrypted credentials handed to a sync routine.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCredentials {
    pub user_id: String,
    pub password: String,
    #[serde(default)]
    pub certificate_password: Option<String>,
}

impl std::fmt::Debug for SavedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SavedCredentials")
            .field("user_id", &self.user_id)
            .field("password", &"***")
            .field(
                "certificate_password",
                &self.certificate_password.as_ref().map(|_| "***"),
            )
            .finish()
    }
}

pub trait CredentialStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<SavedCredentials>, StoreError>;

    fn set(&self, namespace: &str, key: &str, value: &SavedCredentials) -> Result<(), StoreError>;

    /// Returns true if the entry existed.
    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError>;

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError>;
}

/// On-disk form with encrypted secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredentials {
    user_id: String,
    password_enc: String,
    #[serde(default)]
    certificate_password_enc: Option<String>,
    updated_at: String,
}

type StoredFile = BTreeMap<String, BTreeMap<String, StoredCredentials>>;

/// JSON-file backed store; passwords are AES-256-GCM encrypted.
pub struct EncryptedCredentialStore {
    path: PathBuf,
    key: [u8; 32],
    write_lock: Mutex<()>,
}

impl EncryptedCredentialStore {
    pub fn new(path: PathBuf, key: [u8; 32]) -> Self {
        Self {
            path,
            key,
            write_lock: Mutex::new(()),
        }
    }

    /// Open `path`, taking the key from the environment or the data dir.
    pub fn open(path: PathBuf, data_dir: &Path) -> Result<Self, StoreError> {
        let key = load_or_generate_key(data_dir)?;
        Ok(Self::new(path, key))
    }

    fn load(&self) -> Result<StoredFile, StoreError> {
        if !self.path.exists() {
            return Ok(StoredFile::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, file: &StoredFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(file)?)?;
        Ok(())
    }

    fn decrypt(&self, stored: &StoredCredentials) -> Result<SavedCredentials, StoreError> {
        Ok(SavedCredentials {
            user_id: stored.user_id.clone(),
            password: decrypt_secret(&self.key, &stored.password_enc)?,
            certificate_password: stored
                .certificate_password_enc
                .as_deref()
                .map(|c| decrypt_secret(&self.key, c))
                .transpose()?,
        })
    }
}

impl CredentialStore for EncryptedCredentialStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<SavedCredentials>, StoreError> {
        let file = self.load()?;
        file.get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|s| self.decrypt(s))
            .transpose()
    }

    fn set(&self, namespace: &str, key: &str, value: &SavedCredentials) -> Result<(), StoreError> {
        let stored = StoredCredentials {
            user_id: value.user_id.clone(),
            password_enc: encrypt_secret(&self.key, &value.password)?,
            certificate_password_enc: value
                .certificate_password
                .as_deref()
                .map(|c| encrypt_secret(&self.key, c))
                .transpose()?,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.load()?;
        file.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), stored);
        self.save(&file)?;
        info!("Saved credentials for '{namespace}:{key}'");
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.load()?;
        let removed = file
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some());
        if removed {
            self.save(&file)?;
            info!("Deleted credentials for '{namespace}:{key}'");
        }
        Ok(removed)
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .load()?
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// Unencrypted store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: Mutex<BTreeMap<(String, String), SavedCredentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<SavedCredentials>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &SavedCredentials) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((namespace.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(&(namespace.to_string(), key.to_string())).is_some())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }
}
