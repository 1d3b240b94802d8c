//! Sync controller -- per-entity timers, dedup guards, and retry handling.
//!
//! Split into focused submodules:
//! - `core`: controller struct, builder, and accessors
//! - `scheduling`: timers, startup backfill, rescheduling, and shutdown
//! - `execution`: one guarded execution of one entity, with retry scheduling

mod core;
mod execution;
mod scheduling;
#[cfg(test)]
mod tests;

pub use self::core::{SyncController, SyncControllerBuilder};
pub use self::scheduling::backfill_intents;
