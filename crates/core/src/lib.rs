pub mod browser;
pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod intent;

pub use browser::{BrowserDriver, BrowserError, BrowserSession, ClickStrategy};
pub use config::Config;
pub use entity::*;
pub use error::*;
pub use geometry::{Bounds, Point};
pub use intent::{ExecutionIntent, IntentLedger, IntentStatus, IntentTransition, LedgerError};
