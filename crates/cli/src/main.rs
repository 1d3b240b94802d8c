mod cli;
mod commands;
mod schedules;

use anyhow::Result;
use clap::Parser;
use finsync_core::config::load_dotenv;
use finsync_core::Config;

use crate::cli::{CliArgs, Command, CredentialsCommand, KeypadCommand};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Before parsing so .env values reach clap's env-backed flags.
    load_dotenv();
    let args = CliArgs::parse();

    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();

    match args.command {
        Command::Schedules => commands::list_schedules(&config),
        Command::Backfill { days } => commands::backfill(&config, days).await,
        Command::Intents { date } => commands::list_intents(&config, date).await,
        Command::Credentials { action } => match action {
            CredentialsCommand::Set {
                entity,
                user,
                password,
                certificate_password,
            } => commands::set_credentials(&config, &entity, user, password, certificate_password),
            CredentialsCommand::List { kind } => commands::list_credentials(&config, kind),
            CredentialsCommand::Delete { entity } => commands::delete_credentials(&config, &entity),
        },
        Command::Keypad { action } => match action {
            KeypadCommand::Analyze { image, bounds } => {
                commands::analyze_keypad(&config, &image, bounds).await
            }
        },
    }
}
