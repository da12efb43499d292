//! OpenAI-compatible chat completions (Groq, OpenAI, local proxies).

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{LlmProvider, ProviderError, ProviderName};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::{self, DEFAULT_REQUEST_TIMEOUT};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama3-70b-8192";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A provider speaking the `/chat/completions` protocol.
pub struct OpenAiCompatibleProvider {
    name: ProviderName,
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: ProviderName,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = http::client(&name, DEFAULT_REQUEST_TIMEOUT)?;
        Ok(Self {
            name,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            temperature: 0.1,
            client,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = http::client(&self.name, timeout)?;
        Ok(self)
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let response: ChatResponse = http::send_json(&self.name, request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse {
                provider: self.name.clone(),
                message: "response contained no message content".to_string(),
            })
    }
}
