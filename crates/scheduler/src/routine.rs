//! Per-kind sync routines.
//!
//! A routine runs inside a browser session the controller already launched
//! and must not close it. [`InstitutionSyncRoutine`] covers the common
//! login, account listing, and transaction import flow; institution-specific
//! page handling sits behind [`InstitutionAutomator`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use finsync_core::{BrowserSession, Bounds, EntityKey};
use finsync_keypad::{BilingualKeyMapper, DirectTyper, TypingEngine, TypingResult};
use finsync_store::{CredentialStore, StoreError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{AccountInfo, SyncMetadata, TransactionRow, TransactionStore};
use crate::error::SyncError;
use crate::types::{DateRange, SyncSummary};

/// Inputs for one routine run.
pub struct RoutineContext<'a> {
    pub entity: &'a EntityKey,
    pub session: &'a dyn BrowserSession,
    pub range: DateRange,
    pub attempt: u32,
    pub execution_id: Uuid,
}

#[async_trait]
pub trait SyncRoutine: Send + Sync {
    async fn run(&self, ctx: RoutineContext<'_>) -> Result<SyncSummary, SyncError>;
}

/// The login page after the user id has been entered and the password
/// field focused.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginForm {
    /// On-page region of the virtual keypad, when the site uses one.
    pub keypad: Option<Bounds>,
}

/// Institution-specific page automation.
#[async_trait]
pub trait InstitutionAutomator: Send + Sync {
    async fn prepare_login(
        &self,
        session: &dyn BrowserSession,
        user_id: &str,
        certificate_password: Option<&str>,
    ) -> Result<LoginForm, SyncError>;

    async fn submit_login(&self, session: &dyn BrowserSession) -> Result<(), SyncError>;

    async fn list_accounts(&self, session: &dyn BrowserSession) -> Result<Vec<AccountInfo>, SyncError>;

    async fn fetch_transactions(
        &self,
        session: &dyn BrowserSession,
        account: &AccountInfo,
        range: DateRange,
    ) -> Result<Vec<TransactionRow>, SyncError>;
}

pub struct InstitutionSyncRoutine {
    automators: HashMap<String, Arc<dyn InstitutionAutomator>>,
    credentials: Arc<dyn CredentialStore>,
    transactions: Arc<dyn TransactionStore>,
    mapper: Option<Arc<BilingualKeyMapper>>,
    typing: TypingEngine,
    direct: DirectTyper,
}

impl InstitutionSyncRoutine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        transactions: Arc<dyn TransactionStore>,
        typing: TypingEngine,
    ) -> Self {
        Self {
            automators: HashMap::new(),
            credentials,
            transactions,
            mapper: None,
            typing,
            direct: DirectTyper::default(),
        }
    }

    /// Register the automator for one institution id (e.g. `shinhan`).
    pub fn with_automator(mut self, id: impl Into<String>, automator: Arc<dyn InstitutionAutomator>) -> Self {
        self.automators.insert(id.into(), automator);
        self
    }

    pub fn with_keypad_mapper(mut self, mapper: Arc<BilingualKeyMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_direct_typer(mut self, direct: DirectTyper) -> Self {
        self.direct = direct;
        self
    }

    async fn enter_password(
        &self,
        session: &dyn BrowserSession,
        form: LoginForm,
        password: &str,
    ) -> Result<TypingResult, SyncError> {
        match form.keypad {
            Some(region) => {
                let mapper = self.mapper.as_ref().ok_or_else(|| {
                    SyncError::Automation("Virtual keypad present but vision provider not configured".into())
                })?;
                let mapping = mapper.map_keypad(session, region).await?;
                Ok(self.typing.type_secret(session, &mapping, password).await)
            }
            None => Ok(self.direct.type_text(session, password).await),
        }
    }
}

#[async_trait]
impl SyncRoutine for InstitutionSyncRoutine {
    async fn run(&self, ctx: RoutineContext<'_>) -> Result<SyncSummary, SyncError> {
        let key = ctx.entity;
        let automator = self
            .automators
            .get(&key.id)
            .ok_or_else(|| SyncError::Unsupported(key.clone()))?;

        let creds = self
            .credentials
            .get(key.kind.as_str(), &key.id)
            .map_err(|e| credential_error(key, e))?
            .ok_or_else(|| SyncError::MissingCredentials(key.clone()))?;

        let form = automator
            .prepare_login(ctx.session, &creds.user_id, creds.certificate_password.as_deref())
            .await?;
        let typed = self.enter_password(ctx.session, form, &creds.password).await?;
        if !typed.success {
            return Err(SyncError::Typing {
                failed: typed.failed_chars.len(),
                total: typed.total_chars,
            });
        }
        automator.submit_login(ctx.session).await?;
        info!(entity = %key, keypad = form.keypad.is_some(), "Logged in");

        let accounts = automator.list_accounts(ctx.session).await?;
        if accounts.is_empty() {
            return Err(SyncError::NoAccounts(key.clone()));
        }

        let meta = SyncMetadata {
            execution_id: ctx.execution_id,
            range: ctx.range,
            attempt: ctx.attempt,
            synced_at: Utc::now(),
        };
        let mut summary = SyncSummary {
            accounts: accounts.len(),
            ..Default::default()
        };

        for account in &accounts {
            let rows = automator
                .fetch_transactions(ctx.session, account, ctx.range)
                .await?;
            if rows.is_empty() {
                debug!(entity = %key, account = %account.account_id, "no transactions in range");
                continue;
            }
            let imported = self
                .transactions
                .import_transactions(key, account, &rows, &meta)
                .await?;
            if imported.inserted + imported.skipped != rows.len() {
                warn!(
                    entity = %key,
                    account = %account.account_id,
                    fetched = rows.len(),
                    inserted = imported.inserted,
                    skipped = imported.skipped,
                    "import counts do not add up"
                );
            }
            summary.fetched += rows.len();
            summary.inserted += imported.inserted;
            summary.skipped += imported.skipped;
        }

        info!(entity = %key, %summary, "Sync routine finished");
        Ok(summary)
    }
}

/// A store that cannot decrypt or parse its entry will not recover on retry.
fn credential_error(key: &EntityKey, e: StoreError) -> SyncError {
    match e {
        StoreError::Crypto(_) | StoreError::Hex(_) | StoreError::InvalidKey(_) | StoreError::Serialize(_) => {
            warn!(entity = %key, error = %e, "stored credentials unreadable");
            SyncError::InvalidCredentials(key.clone())
        }
        other => other.into(),
    }
}
