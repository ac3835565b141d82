//! Judge clients: the external LLM that scores answers and generates courses.
//!
//! Two wire styles are supported:
//!   - local generate API (Ollama): `POST {base}/api/generate`, reply `{"response": "..."}`
//!   - OpenAI-compatible chat completions: `POST {base}/chat/completions`,
//!     reply text at `choices[0].message.content`
//!
//! NOTE: We never log the API key, prompts or answers; only sizes and latencies.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::JudgeError;
use crate::util::{strip_code_fence, trunc_for_log};

/// The verdict contract: `{"isCorrect": bool, "feedback": string}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
  #[serde(rename = "isCorrect")]
  pub is_correct: bool,
  #[serde(default)]
  pub feedback: String,
}

/// Parse judge output after stripping an optional code fence.
pub fn parse_verdict(raw: &str) -> Result<Verdict, JudgeError> {
  let clean = strip_code_fence(raw);
  serde_json::from_str::<Verdict>(clean)
    .map_err(|e| JudgeError::Malformed(format!("{e}; got: {}", trunc_for_log(clean, 80))))
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
  pub role: String,
  pub content: String,
}

impl ChatMessage {
  pub fn system(content: impl Into<String>) -> Self {
    Self { role: "system".into(), content: content.into() }
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self { role: "user".into(), content: content.into() }
  }
}

/// One completion round-trip. Cancellation is done by dropping the future.
#[async_trait]
pub trait Judge: Send + Sync {
  async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<String, JudgeError>;
}

#[derive(Clone)]
pub struct HttpJudge {
  client: reqwest::Client,
  provider: ProviderConfig,
}

impl HttpJudge {
  /// `hard_timeout` caps any single request; judgements use a shorter ceiling on top.
  pub fn new(provider: ProviderConfig, hard_timeout: Duration) -> Result<Self, JudgeError> {
    let client = reqwest::Client::builder().timeout(hard_timeout).build()?;
    Ok(Self { client, provider })
  }

  async fn generate_local(&self, messages: &[ChatMessage]) -> Result<String, JudgeError> {
    // The generate API takes a single prompt: system text first, then the user text.
    let mut prompt = String::new();
    for m in messages {
      match m.role.as_str() {
        "system" => {
          prompt.push_str(&m.content);
          prompt.push('\n');
        }
        "user" => prompt.push_str(&m.content),
        _ => {}
      }
    }
    let url = format!("{}/api/generate", self.provider.base_url);
    let req = GenerateRequest { model: &self.provider.model, prompt: &prompt, stream: false };
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, "mindgym-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(&req)
      .send()
      .await?;
    let res = check_status(res).await?;
    let body: GenerateResponse = res.json().await.map_err(|e| JudgeError::Malformed(e.to_string()))?;
    Ok(body.response)
  }

  async fn chat_completion(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<String, JudgeError> {
    let url = format!("{}/chat/completions", self.provider.base_url);
    let req = ChatCompletionRequest { model: self.provider.model.clone(), messages, temperature: 0.5, max_tokens };

    let mut builder = self
      .client
      .post(&url)
      .header(USER_AGENT, "mindgym-backend/0.1")
      .header(CONTENT_TYPE, "application/json");
    if let Some(key) = &self.provider.api_key {
      builder = builder.header(AUTHORIZATION, format!("Bearer {}", key));
    }
    if self.provider.kind == ProviderKind::OpenRouter {
      builder = builder.header("HTTP-Referer", "http://localhost").header("X-Title", "MindGym");
    }

    let res = check_status(builder.json(&req).send().await?).await?;
    let body: ChatCompletionResponse = res.json().await.map_err(|e| JudgeError::Malformed(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(target: "judge", prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "LLM usage");
    }
    Ok(
      body
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default()
        .trim()
        .to_string(),
    )
  }
}

#[async_trait]
impl Judge for HttpJudge {
  #[instrument(level = "info", skip(self, messages), fields(provider = ?self.provider.kind, model = %self.provider.model, msg_count = messages.len()))]
  async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<String, JudgeError> {
    let start = Instant::now();
    let result = match self.provider.kind {
      ProviderKind::Ollama => self.generate_local(&messages).await,
      _ => self.chat_completion(messages, max_tokens).await,
    };
    let elapsed = start.elapsed();
    match &result {
      Ok(text) => info!(target: "judge", ?elapsed, reply_len = text.len(), "LLM reply received"),
      Err(e) => error!(target: "judge", ?elapsed, error = %e, "LLM call failed"),
    }
    result
  }
}

/// Stand-in when no usable provider is configured: every call fails, so answers
/// get fallback feedback and generation reports the problem.
pub struct UnconfiguredJudge;

#[async_trait]
impl Judge for UnconfiguredJudge {
  async fn complete(&self, _messages: Vec<ChatMessage>, _max_tokens: u32) -> Result<String, JudgeError> {
    Err(JudgeError::Transport("no judge provider configured".into()))
  }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, JudgeError> {
  if res.status().is_success() {
    return Ok(res);
  }
  let status = res.status();
  let body = res.text().await.unwrap_or_default();
  let message = extract_api_error(&body).unwrap_or(body);
  Err(JudgeError::Http { status: status.as_u16(), message })
}

// --- Wire DTOs ---

#[derive(Serialize)]
struct GenerateRequest<'a> {
  model: &'a str,
  prompt: &'a str,
  stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
  #[serde(default)]
  response: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessage>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  #[serde(default)]
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
