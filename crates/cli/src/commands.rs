use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use finsync_core::{Bounds, Config, EntityKey, EntityKind, IntentLedger};
use finsync_keypad::{KeyboardLayoutAnalyzer, KeypadMapping};
use finsync_scheduler::backfill_intents;
use finsync_scheduler::timing::next_fire;
use finsync_store::{CredentialStore, EncryptedCredentialStore, JsonIntentLedger, SavedCredentials};
use tracing::info;

use crate::schedules;

pub fn list_schedules(config: &Config) -> Result<()> {
    let schedules = schedules::load(&config.storage.schedules_path())?;
    if schedules.is_empty() {
        println!("No entities configured in {}", config.storage.schedules_path().display());
        return Ok(());
    }

    let now = Local::now().naive_local();
    println!("{:<24} {:<8} {:<6} NEXT RUN", "ENTITY", "ENABLED", "TIME");
    for (key, schedule) in &schedules {
        let next = if schedule.enabled {
            next_fire(now, schedule.time_of_day).format("%Y-%m-%d %H:%M").to_string()
        } else {
            "-".to_string()
        };
        println!(
            "{:<24} {:<8} {:<6} {}",
            key.to_string(),
            schedule.enabled,
            schedule.time_of_day.format("%H:%M").to_string(),
            next
        );
    }
    Ok(())
}

pub async fn backfill(config: &Config, days: Option<u32>) -> Result<()> {
    let schedules = schedules::load(&config.storage.schedules_path())?;
    let ledger = JsonIntentLedger::open(config.storage.ledger_path())?;
    let days = days.unwrap_or(config.sync.backfill_days);

    let created = backfill_intents(
        &ledger,
        &schedules,
        Local::now().date_naive(),
        days,
        config.sync.execution_window(),
    )
    .await?;
    println!("Created {created} pending intent(s) over the last {days} day(s)");
    Ok(())
}

pub async fn list_intents(config: &Config, date: Option<NaiveDate>) -> Result<()> {
    let ledger = JsonIntentLedger::open(config.storage.ledger_path())?;
    let intents = ledger.list_intents(date).await?;
    if intents.is_empty() {
        println!("No intents recorded");
        return Ok(());
    }

    println!(
        "{:<10} {:<24} {:<10} {:>8} {:<13} DETAIL",
        "DATE", "ENTITY", "STATUS", "ATTEMPTS", "WINDOW"
    );
    for intent in intents {
        let window = format!(
            "{}-{}",
            intent.execution_window_start.format("%H:%M"),
            intent.execution_window_end.format("%H:%M")
        );
        let detail = intent
            .error_message
            .or(intent.summary)
            .unwrap_or_default();
        println!(
            "{:<10} {:<24} {:<10} {:>8} {:<13} {}",
            intent.intended_date.to_string(),
            intent.task_id.to_string(),
            intent.status.to_string(),
            intent.attempts,
            window,
            detail
        );
    }
    Ok(())
}

fn credential_store(config: &Config) -> Result<EncryptedCredentialStore> {
    Ok(EncryptedCredentialStore::open(
        config.storage.credentials_path(),
        &config.storage.data_dir,
    )?)
}

/// First line of stdin, without the line ending.
fn read_secret_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}: ");
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from stdin")?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        bail!("{prompt} must not be empty");
    }
    Ok(secret)
}

pub fn set_credentials(
    config: &Config,
    entity: &EntityKey,
    user: String,
    password: Option<String>,
    certificate_password: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => read_secret_line("Password")?,
    };
    let store = credential_store(config)?;
    store.set(
        entity.kind.as_str(),
        &entity.id,
        &SavedCredentials {
            user_id: user,
            password,
            certificate_password,
        },
    )?;
    println!("Saved credentials for {entity}");
    Ok(())
}

pub fn list_credentials(config: &Config, kind: Option<EntityKind>) -> Result<()> {
    let store = credential_store(config)?;
    let kinds = match kind {
        Some(k) => vec![k],
        None => EntityKind::ALL.to_vec(),
    };
    for kind in kinds {
        for id in store.list_keys(kind.as_str())? {
            println!("{}", EntityKey::new(kind, id));
        }
    }
    Ok(())
}

pub fn delete_credentials(config: &Config, entity: &EntityKey) -> Result<()> {
    let store = credential_store(config)?;
    if store.delete(entity.kind.as_str(), &entity.id)? {
        println!("Deleted credentials for {entity}");
    } else {
        println!("No credentials saved for {entity}");
    }
    Ok(())
}

pub async fn analyze_keypad(config: &Config, image: &Path, bounds: Bounds) -> Result<()> {
    let png = std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let provider = finsync_vision::create_provider(&config.vision)?;
    info!(provider = provider.name(), "Analyzing keypad screenshot");

    let analyzer = KeyboardLayoutAnalyzer::new(provider, config.keypad.repair_attempts);
    let layout = analyzer.analyze(&png, bounds).await?;

    println!("{:<10} {:>8} {:>8}  SOURCE", "LABEL", "X", "Y");
    for key in layout.keys() {
        println!(
            "{:<10} {:>8.1} {:>8.1}  {}",
            key.label,
            key.click_position.x,
            key.click_position.y,
            if key.centroid_from_mask { "mask" } else { "box" }
        );
    }

    let mapping = KeypadMapping::merge(&layout, None);
    println!(
        "{} keys, {} typeable characters, shift key: {}",
        layout.len(),
        mapping.len(),
        mapping.shift_key.as_ref().map_or("none", |k| k.label.as_str())
    );
    Ok(())
}
