use async_trait::async_trait;

/// Trait for vision-model backends that can look at an image.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Send a PNG image plus an instruction prompt and return the model's raw text.
    async fn analyze(&self, image_png: &[u8], prompt: &str) -> Result<String, VisionError>;

    /// Human-readable backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}
