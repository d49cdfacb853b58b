//! HTTP-backed provider implementations.
//!
//! The embedding wire format:
//! request `{"model": …, "input": <string | string-array | multimodal-array>}`,
//! response `{"data": [{"embedding": […], "index": n}, …]}` for text and
//! `{"data": {"embedding": […]}}` for multimodal input. The generative
//! provider speaks the OpenAI-compatible `chat/completions` body.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{EmbeddingService, LlmService, ProviderError, ProviderResult};
use crate::config::{EmbeddingConfig, LlmConfig};
use crate::constants::MAX_EMBED_BATCH;

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);

/// How much of an error body is kept in the error message.
const ERROR_BODY_LIMIT: usize = 512;

/// Embedding provider speaking the JSON wire format above.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    multimodal: bool,
}

impl HttpEmbeddingService {
    pub fn new(config: &EmbeddingConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            multimodal: config.multimodal,
        })
    }

    async fn post(&self, input: Value) -> ProviderResult<Value> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "input": input,
        }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(response.json().await?)
    }
}

#[derive(Deserialize)]
struct BatchItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let body = self.post(Value::String(text.to_string())).await?;
        let mut items: Vec<BatchItem> = parse_data_array(&body)?;
        items
            .pop()
            .map(|item| item.embedding)
            .ok_or_else(|| ProviderError::MalformedResponse {
                detail: "empty data array".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.len() > MAX_EMBED_BATCH {
            return Err(ProviderError::BatchTooLarge {
                len: texts.len(),
                max: MAX_EMBED_BATCH,
            });
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.post(json!(texts)).await?;
        let items: Vec<BatchItem> = parse_data_array(&body)?;
        if items.len() != texts.len() {
            return Err(ProviderError::MalformedResponse {
                detail: format!("expected {} embeddings, got {}", texts.len(), items.len()),
            });
        }

        // Align to input order via the returned indices.
        let mut vectors: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        for item in items {
            if item.index >= vectors.len() {
                return Err(ProviderError::MalformedResponse {
                    detail: format!("embedding index {} out of range", item.index),
                });
            }
            vectors[item.index] = item.embedding;
        }
        Ok(vectors)
    }

    async fn embed_image_url(&self, image_url: &str) -> ProviderResult<Vec<f32>> {
        if !self.multimodal {
            return Err(ProviderError::MultimodalDisabled);
        }

        let input = json!([{
            "type": "image_url",
            "image_url": {"url": image_url},
        }]);
        let body = self.post(input).await?;

        // Multimodal responses carry a single object instead of an array.
        let embedding = body
            .get("data")
            .and_then(|d| d.get("embedding"))
            .cloned()
            .ok_or_else(|| ProviderError::MalformedResponse {
                detail: "missing data.embedding".to_string(),
            })?;
        serde_json::from_value(embedding).map_err(|e| ProviderError::MalformedResponse {
            detail: format!("bad embedding array: {e}"),
        })
    }
}

fn parse_data_array(body: &Value) -> ProviderResult<Vec<BatchItem>> {
    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| ProviderError::MalformedResponse {
            detail: "missing data field".to_string(),
        })?;
    serde_json::from_value(data).map_err(|e| ProviderError::MalformedResponse {
        detail: format!("bad data array: {e}"),
    })
}

/// Generative provider speaking `chat/completions`.
#[derive(Debug, Clone)]
pub struct HttpLlmService {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl HttpLlmService {
    pub fn new(config: &LlmConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn chat(&self, system_prompt: &str, user_content: Value) -> ProviderResult<String> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_content},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        }));
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::MalformedResponse {
                detail: "missing choices[0].message.content".to_string(),
            })?;
        debug!(reply_len = content.len(), "generation complete");
        Ok(content.to_string())
    }
}

/// Joins context chunks and the question into one user turn.
fn user_text(context: &[String], question: &str) -> String {
    if context.is_empty() {
        return question.to_string();
    }
    let mut text = String::from("Reference material:\n");
    for chunk in context {
        text.push_str("- ");
        text.push_str(chunk);
        text.push('\n');
    }
    text.push_str("\nQuestion: ");
    text.push_str(question);
    text
}

impl LlmService for HttpLlmService {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> ProviderResult<String> {
        self.chat(system_prompt, Value::String(user_text(context, question)))
            .await
    }

    async fn generate_with_image(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
        image_data_url: &str,
    ) -> ProviderResult<String> {
        let content = json!([
            {"type": "text", "text": user_text(context, question)},
            {"type": "image_url", "image_url": {"url": image_data_url}},
        ]);
        self.chat(system_prompt, content).await
    }
}
