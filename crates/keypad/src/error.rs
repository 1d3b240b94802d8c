use finsync_core::BrowserError;
use finsync_vision::VisionError;

#[derive(Debug, thiserror::Error)]
pub enum KeypadError {
    #[error("vision service error: {0}")]
    Vision(#[from] VisionError),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("no keys detected in keypad image")]
    NoKeysDetected,
}
