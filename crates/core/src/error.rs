use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid entity key: {0}")]
    InvalidEntityKey(String),

    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    #[error("{0}")]
    Other(String),
}
