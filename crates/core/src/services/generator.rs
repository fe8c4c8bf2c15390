use crate::error::{IngestError, Result};
use crate::services::{http_client, DEFAULT_REQUEST_TIMEOUT};
use crate::traits::Generator;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// OpenAI-compatible `chat/completions` client. Images travel inline as
/// base64 PNG data URLs.
pub struct ChatCompletionsGenerator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    system_prompt: Option<String>,
}

impl ChatCompletionsGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client(DEFAULT_REQUEST_TIMEOUT)?,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            system_prompt: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.is_empty());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn url(&self) -> Result<Url> {
        let base = Url::parse(&format!("{}/", self.endpoint.trim_end_matches('/')))
            .map_err(|error| IngestError::InvalidArgument(format!("generator endpoint: {error}")))?;
        base.join("chat/completions")
            .map_err(|error| IngestError::InvalidArgument(format!("generator endpoint: {error}")))
    }

    fn request_body(&self, prompt: &str, image_png: Option<&[u8]>) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }

        let content = match image_png {
            Some(bytes) => json!([
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": png_data_url(bytes) }
                }
            ]),
            None => json!(prompt),
        };
        messages.push(json!({ "role": "user", "content": content }));

        json!({
            "model": self.model,
            "messages": messages,
        })
    }
}

pub fn png_data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

fn message_content(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| IngestError::Extraction("completion response has no message content".to_string()))
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str, image_png: Option<&[u8]>) -> Result<String> {
        let mut request = self
            .client
            .post(self.url()?)
            .json(&self.request_body(prompt, image_png));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(IngestError::Extraction(format!(
                "generator returned {status}: {details}"
            )));
        }

        let body: Value = response.json().await?;
        let content = message_content(&body)?;
        debug!(model = %self.model, chars = content.len(), "generation finished");
        Ok(content)
    }
}
