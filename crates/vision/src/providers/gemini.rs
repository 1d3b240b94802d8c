use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use tracing::debug;

use crate::provider::{VisionError, VisionProvider};

pub struct GeminiVisionProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiVisionProvider {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
            temperature,
            max_tokens,
        }
    }

    /// Build the request body for the generateContent API: the image goes
    /// first as inline data, then the instruction text.
    fn build_request_body(
        image_png: &[u8],
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> serde_json::Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/png",
                            "data": BASE64.encode(image_png),
                        }
                    },
                    { "text": prompt },
                ],
            }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
                "responseMimeType": "application/json",
            },
        })
    }

    fn extract_text(resp: &serde_json::Value) -> Result<String, VisionError> {
        let parts = resp["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| VisionError::ParseError("missing candidates[0].content.parts".into()))?;

        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(VisionError::ParseError("empty text in response".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl VisionProvider for GeminiVisionProvider {
    async fn analyze(&self, image_png: &[u8], prompt: &str) -> Result<String, VisionError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model,
        );

        let body = Self::build_request_body(image_png, prompt, self.temperature, self.max_tokens);

        debug!(model = %self.model, image_bytes = image_png.len(), "Gemini vision request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::ApiError { status, body });
        }

        let resp: serde_json::Value = response.json().await?;
        Self::extract_text(&resp)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
