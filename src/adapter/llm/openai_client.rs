// src/adapter/llm/openai_client.rs
//! Summary generator backed by an OpenAI-compatible `chat/completions` API.
//!
//! Only the rendered aggregate numbers are sent; no CRM rows leave the
//! service. The HTTP client carries its own timeout, and the report pipeline
//! wraps the call in a second, hard one.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::llm_config::LlmConfig;
use crate::domain::error::AnalyticsError;
use crate::service::summary_generator::{SummaryGenerator, SummaryPrompt};

const SYSTEM_PROMPT: &str = "You are a sales analyst. Write a concise executive summary (at most three short \
paragraphs) of the sales figures provided. Mention notable trends, the forecast when present and any anomalies. \
Do not invent numbers that are not in the input.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiSummaryGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiSummaryGenerator {
    pub fn new(cfg: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("llm.api_key is not configured"))?;
        let client = Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", cfg.base_url.trim_end_matches('/')),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        })
    }
}

#[async_trait]
impl SummaryGenerator for OpenAiSummaryGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn summarize(&self, prompt: &SummaryPrompt) -> Result<String, AnalyticsError> {
        let user_message = prompt.render();
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let started = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "LLM request failed");
                AnalyticsError::ExternalService(format!("summary service unreachable: {e}"))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body = %body.chars().take(200).collect::<String>(), "LLM API error");
            return Err(AnalyticsError::ExternalService(format!("summary service returned {status}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AnalyticsError::ExternalService(format!("unreadable summary response: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AnalyticsError::ExternalService("summary response contained no text".into()))?;

        debug!(model = %self.model, elapsed_ms = started.elapsed().as_millis() as u64, "LLM summary received");
        Ok(text)
    }
}
