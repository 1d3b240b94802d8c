pub mod gemini;

use std::sync::Arc;

use finsync_core::config::VisionConfig;

use crate::provider::{VisionError, VisionProvider};

/// Create the vision provider selected by config.
pub fn create_provider(config: &VisionConfig) -> Result<Arc<dyn VisionProvider>, VisionError> {
    match config.provider.as_str() {
        "gemini" => {
            let api_key = config
                .gemini_api_key
                .as_ref()
                .ok_or_else(|| VisionError::NotConfigured("GEMINI_API_KEY not set".into()))?;
            Ok(Arc::new(gemini::GeminiVisionProvider::new(
                api_key.clone(),
                config.gemini_model.clone(),
                config.gemini_base_url.clone(),
                config.temperature,
                config.max_tokens,
            )))
        }
        other => Err(VisionError::NotConfigured(format!(
            "unknown vision provider: '{}'",
            other
        ))),
    }
}
