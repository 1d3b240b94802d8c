//! Host sleep inhibition while the controller is active.

use std::process::Stdio;
use std::sync::Mutex;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub trait KeepAwake: Send + Sync {
    fn acquire(&self) -> std::io::Result<()>;

    fn release(&self);
}

/// Does nothing. Used where the host has no inhibitor or it is disabled.
pub struct NoopKeepAwake;

impl KeepAwake for NoopKeepAwake {
    fn acquire(&self) -> std::io::Result<()> {
        debug!("keep-awake not supported on this host");
        Ok(())
    }

    fn release(&self) {}
}

/// Holds an inhibitor child process (`caffeinate` / `systemd-inhibit`) for as
/// long as it is acquired.
pub struct ProcessKeepAwake {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessKeepAwake {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            child: Mutex::new(None),
        }
    }

    /// The inhibitor for the current OS, if there is one.
    pub fn for_host() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Self::new("caffeinate", &["-i"]))
        } else if cfg!(target_os = "linux") {
            Some(Self::new(
                "systemd-inhibit",
                &[
                    "--what=sleep:idle",
                    "--who=finsync",
                    "--why=Scheduled financial sync",
                    "sleep",
                    "infinity",
                ],
            ))
        } else {
            None
        }
    }

    pub fn is_held(&self) -> bool {
        self.child.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl KeepAwake for ProcessKeepAwake {
    fn acquire(&self) -> std::io::Result<()> {
        let mut slot = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Ok(());
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!(program = %self.program, pid = child.id(), "Keep-awake acquired");
        *slot = Some(child);
        Ok(())
    }

    fn release(&self) {
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            match child.start_kill() {
                Ok(()) => info!(program = %self.program, "Keep-awake released"),
                Err(e) => warn!(program = %self.program, error = %e, "failed to stop keep-awake process"),
            }
        }
    }
}

impl Drop for ProcessKeepAwake {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_fails_to_acquire() {
        let k = ProcessKeepAwake::new("finsync-no-such-inhibitor", &[]);
        assert!(k.acquire().is_err());
        assert!(!k.is_held());
        k.release();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn acquire_and_release_child() {
        let k = ProcessKeepAwake::new("sleep", &["30"]);
        k.acquire().unwrap();
        assert!(k.is_held());
        // Second acquire keeps the same child.
        k.acquire().unwrap();
        k.release();
        assert!(!k.is_held());
    }
}
