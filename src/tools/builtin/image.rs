//! Image generation through the OpenAI images endpoint (DALL-E 3).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::tools::tool::{Tool, ToolContext, ToolError, optional_str, require_str};

const IMAGE_MODEL: &str = "dall-e-3";

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Image generation tool. The result is a photo URL meant to be sent to the user directly.
pub struct ImageGenerationTool {
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl ImageGenerationTool {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for ImageGenerationTool {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn source_name(&self) -> &str {
        "DALL-E"
    }

    fn description(&self) -> &str {
        "Generate an image from a textual description using DALL-E."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "Textual description for the image, the text must be in english."},
                "size": {"type": "string", "description": "Size of the generated image."},
                "quality": {"type": "string", "description": "Quality of the generated image."},
                "n": {"type": "integer", "description": "Number of images to generate."}
            },
            "required": ["prompt"]
        })
    }

    async fn invoke(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let prompt = require_str(&params, "prompt")?;
        let body = json!({
            "model": IMAGE_MODEL,
            "prompt": prompt,
            "size": optional_str(&params, "size").unwrap_or("1024x1024"),
            "quality": optional_str(&params, "quality").unwrap_or("standard"),
            "n": params.get("n").and_then(Value::as_u64).unwrap_or(1),
        });

        let resp = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Error: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed(format!(
                "Error: image generation returned HTTP {}: {}",
                status, text
            )));
        }

        let images: ImagesResponse = resp
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Error: {}", e)))?;

        let url = images
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ToolError::ExecutionFailed("Error: no image returned".to_string()))?;

        Ok(json!({
            "direct_result": {
                "kind": "photo",
                "format": "url",
                "value": url,
            }
        }))
    }
}
