//! OpenAI-compatible clients for query translation and text embeddings
//!
//! Both speak the public REST API (`/chat/completions`, `/embeddings`), so
//! any compatible endpoint can be targeted through `base_url`.

use crate::params::Params;
use crate::template::ParamSpec;
use crate::translator::{describe_params, Translator};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use staysearch_core::{Embedder, Error, Result, Vector};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> std::result::Result<Client, reqwest::Error> {
        Client::builder().timeout(self.timeout).build()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Chat-completion translator returning a JSON object of parameter values
pub struct OpenAiTranslator {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiTranslator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = config
            .client()
            .map_err(|e| Error::InvalidConfig(format!("translator http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn system_prompt(params: &[ParamSpec]) -> String {
        format!(
            "You turn a search request for accommodation listings into query parameters.\n\
             Reply with a single JSON object. Use only these keys, and leave out any \
             parameter the request does not mention. Each piece of the request belongs \
             to exactly one parameter.\n{}",
            describe_params(params)
        )
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, text: &str, params: &[ParamSpec]) -> Result<Params> {
        let body = json!({
            "model": self.config.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": Self::system_prompt(params) },
                { "role": "user", "content": text },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TranslationFailed(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::TranslationFailed(format!(
                "translator returned {}",
                response.status()
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::TranslationFailed(format!("malformed response: {}", e)))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::TranslationFailed("empty completion".to_string()))?;

        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => {
                debug!("Translated natural query into {} params", map.len());
                Ok(map)
            }
            _ => Err(Error::TranslationFailed(
                "completion is not a JSON object".to_string(),
            )),
        }
    }
}

/// Embeddings endpoint client. The model identity requested by the text
/// space is forwarded as-is.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = config
            .client()
            .map_err(|e| Error::InvalidConfig(format!("embedding http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vector> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "model": model, "input": text }))
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding provider returned {}",
                response.status()
            )));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed response: {}", e)))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| Vector::new(d.embedding))
            .ok_or_else(|| Error::EmbeddingUnavailable("no embedding returned".to_string()))
    }
}
