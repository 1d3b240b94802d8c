use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use finsync_core::{Bounds, EntityKey, EntityKind};

/// Daily bank, card, and tax transaction sync.
///
/// Inspects schedules and the intent ledger, manages saved credentials, and
/// runs the keypad analyzer against saved screenshots.
#[derive(Parser, Debug)]
#[command(name = "finsync", about = "Daily bank, card, and tax transaction sync")]
pub struct CliArgs {
    /// Config profile (overrides FINSYNC_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List configured entities and their next fire time
    Schedules,

    /// Create pending intents for days with no recorded intent
    Backfill {
        /// Days to look back (default: SYNC_BACKFILL_DAYS)
        #[arg(long)]
        days: Option<u32>,
    },

    /// List recorded execution intents
    Intents {
        /// Only intents for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Manage saved login credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsCommand,
    },

    /// Virtual keypad tools
    Keypad {
        #[command(subcommand)]
        action: KeypadCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialsCommand {
    /// Save credentials for an entity such as card:shinhan
    Set {
        entity: EntityKey,
        user: String,
        /// Read from stdin when neither the flag nor the env var is set
        #[arg(long, env = "FINSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long, env = "FINSYNC_CERT_PASSWORD", hide_env_values = true)]
        certificate_password: Option<String>,
    },

    /// List entities with saved credentials
    List {
        /// Only this kind: bank, card, or tax
        kind: Option<EntityKind>,
    },

    /// Remove saved credentials
    Delete { entity: EntityKey },
}

#[derive(Subcommand, Debug)]
pub enum KeypadCommand {
    /// Detect keys in a saved keypad screenshot and print the key map
    Analyze {
        /// PNG screenshot of the keypad region
        image: PathBuf,
        /// On-page keypad box as x,y,width,height
        #[arg(long, value_parser = parse_bounds)]
        bounds: Bounds,
    },
}

/// Parse `x,y,width,height` in page pixels.
pub fn parse_bounds(s: &str) -> Result<Bounds, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{s}': {e}"))?;

    let [x, y, width, height] = parts[..] else {
        return Err(format!("expected x,y,width,height, got '{s}'"));
    };
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("width and height must be positive, got '{s}'"));
    }
    Ok(Bounds::new(x, y, width, height))
}
