//! Runtime configuration: environment variables for the server and the judge
//! provider, plus an optional TOML file for prompts, coach phrases and timeouts.
//!
//! See `AgentConfig`, `Prompts`, `CoachMessages` and `ProviderConfig` for the schema.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AgentConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub messages: CoachMessages,
  #[serde(default)]
  pub timeouts: Timeouts,
}

/// Prompts sent to the judge / generator. Placeholders are `{name}` (see `util::fill_template`).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Placeholders: validation_prompt, situation, expected, answer.
  pub judge_template: String,
  pub course_style_guide: String,
  /// Placeholders: style_guide.
  pub course_system_template: String,
  /// Placeholders: topic.
  pub course_user_template: String,
  /// Placeholders: order.
  pub module_system_template: String,
  /// Placeholders: course_title.
  pub module_user_template: String,
  /// Placeholders: module_id.
  pub exercise_system_template: String,
  /// Placeholders: module_title.
  pub exercise_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      judge_template: "{validation_prompt}\nSituation: \"{situation}\"\nReference answer: \"{expected}\"\nUser answer: \"{answer}\"\nReturn ONLY valid JSON:\n{\n  \"isCorrect\": true/false,\n  \"feedback\": \"string or empty\"\n}\nYou must answer with valid JSON ONLY. No explanations, no reasoning, no preamble.".into(),
      course_style_guide: DEFAULT_STYLE_GUIDE.trim().into(),
      course_system_template: "You are an expert in building interactive MindGym trainings.\nFollow the guide strictly:\n\n{style_guide}\n\nReturn ONLY valid JSON in MindGym format, no explanations, no markdown, no text before or after.".into(),
      course_user_template: "Create a course from this description:\n\"{topic}\"".into(),
      module_system_template: "You are an expert in building MindGym courses.\nCreate ONE new module as JSON:\n{\n  \"id\": \"unique_string_id\",\n  \"title\": \"...\",\n  \"description\": \"...\",\n  \"order\": {order}\n}\nReturn ONLY this object, no explanations.".into(),
      module_user_template: "Course: \"{course_title}\". Add a module on a topic related to the course.".into(),
      exercise_system_template: "You are an expert in building MindGym courses.\nCreate ONE new exercise as JSON:\n{\n  \"id\": \"unique_string_id\",\n  \"module_id\": \"{module_id}\",\n  \"prompt\": \"...\",\n  \"expected_answer\": \"...\",\n  \"feedback_on_error\": \"...\",\n  \"difficulty\": 2\n}\nReturn ONLY this object, no explanations.".into(),
      exercise_user_template: "Module: \"{module_title}\". Add an exercise on the module's topic.".into(),
    }
  }
}

const DEFAULT_STYLE_GUIDE: &str = r#"
## Course structure
A course is JSON with the fields: metadata, modules, exercises.

## metadata
- title: short name (up to 50 characters)
- description: SEO description (up to 160 characters)
- version: "1.0"
- validation_prompt: the AI's role and grading criteria (required!)

## modules
Array of objects:
- id: unique string id (for example "m1")
- title: module heading
- description: 1-2 sentences about the module
- order: number (1, 2, 3...)

## exercises
Array of objects:
- id: unique id (for example "e1")
- module_id: reference to a module
- prompt: context + question (2-3 sentences)
- expected_answer: short, conversational, case-specific answer (3-8 words)
- feedback_on_error: only the analysis of the mistake, no praise
- difficulty: 1-3

## Important!
- All fields are required.
- expected_answer must be unique to its case.
- feedback_on_error must NOT start with "Correct", "Right", "Great".
- Return ONLY JSON, no explanations.
"#;

/// What the coach says around a judgement.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoachMessages {
  /// Placeholders: secs.
  pub thinking: String,
  pub correct: String,
  /// Placeholders: expected.
  pub reference_answer: String,
  /// Prefix for any corrective feedback.
  pub feedback_prefix: String,
  pub try_again: String,
  pub timeout_fallback: String,
  pub completion: String,
}

impl Default for CoachMessages {
  fn default() -> Self {
    Self {
      thinking: "Thinking… ({secs}s)".into(),
      correct: "✅ Correct!".into(),
      reference_answer: "📘 One way to answer: {expected}".into(),
      feedback_prefix: "💡 ".into(),
      try_again: "Try again.".into(),
      timeout_fallback: "The coach took too long to answer. Try again.".into(),
      completion: crate::render::DEFAULT_COMPLETION_TEXT.into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Timeouts {
  pub judge_secs: u64,
  pub generate_secs: u64,
  /// Sessions untouched for this long are dropped from memory; saved progress stays.
  pub session_idle_secs: u64,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self { judge_secs: 25, generate_secs: 120, session_idle_secs: 3600 }
  }
}

impl Timeouts {
  pub fn judge(&self) -> Duration {
    Duration::from_secs(self.judge_secs)
  }

  pub fn generate(&self) -> Duration {
    Duration::from_secs(self.generate_secs)
  }

  pub fn session_idle(&self) -> Duration {
    Duration::from_secs(self.session_idle_secs)
  }
}

/// Attempt to load `AgentConfig` from MINDGYM_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_agent_config_from_env() -> Option<AgentConfig> {
  let path = std::env::var("MINDGYM_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AgentConfig>(&s) {
      Ok(cfg) => {
        info!(target: "mindgym", %path, "Loaded agent config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "mindgym", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "mindgym", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
  /// Local generate API (`/api/generate`), no key.
  Ollama,
  OpenRouter,
  OpenAi,
  Mistral,
  /// Any OpenAI-compatible endpoint; base URL required.
  Custom,
}

impl ProviderKind {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "ollama" => Some(Self::Ollama),
      "openrouter" => Some(Self::OpenRouter),
      "openai" => Some(Self::OpenAi),
      "mistral" => Some(Self::Mistral),
      "custom" => Some(Self::Custom),
      _ => None,
    }
  }

  pub fn default_base_url(self) -> Option<&'static str> {
    match self {
      Self::Ollama => Some("http://localhost:11434"),
      Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
      Self::OpenAi => Some("https://api.openai.com/v1"),
      Self::Mistral => Some("https://api.mistral.ai/v1"),
      Self::Custom => None,
    }
  }

  pub fn default_model(self) -> &'static str {
    match self {
      Self::Ollama => "qwen3:4b",
      Self::OpenRouter => "qwen/qwen3-8b:free",
      Self::OpenAi => "gpt-4o-mini",
      Self::Mistral => "mistral-small-latest",
      Self::Custom => "",
    }
  }
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
  pub kind: ProviderKind,
  pub base_url: String,
  pub model: String,
  pub api_key: Option<String>,
}

impl ProviderConfig {
  /// Build from MINDGYM_PROVIDER / MINDGYM_BASE_URL / MINDGYM_MODEL / MINDGYM_API_KEY.
  /// Defaults to a local Ollama. Returns None for an unknown provider or a custom one without URL.
  pub fn from_env() -> Option<Self> {
    let kind_raw = std::env::var("MINDGYM_PROVIDER").unwrap_or_else(|_| "ollama".into());
    let Some(kind) = ProviderKind::parse(&kind_raw) else {
      error!(target: "mindgym", provider = %kind_raw, "Unknown MINDGYM_PROVIDER");
      return None;
    };
    Self::resolve(
      kind,
      std::env::var("MINDGYM_BASE_URL").ok(),
      std::env::var("MINDGYM_MODEL").ok(),
      std::env::var("MINDGYM_API_KEY").ok(),
    )
  }

  pub fn resolve(
    kind: ProviderKind,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
  ) -> Option<Self> {
    let base_url = base_url
      .filter(|u| !u.trim().is_empty())
      .or_else(|| kind.default_base_url().map(String::from));
    let Some(base_url) = base_url else {
      error!(target: "mindgym", ?kind, "Provider needs MINDGYM_BASE_URL");
      return None;
    };
    let model = model
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| kind.default_model().to_string());
    let api_key = api_key.filter(|k| !k.is_empty());
    Some(Self { kind, base_url: base_url.trim_end_matches('/').to_string(), model, api_key })
  }
}

/// Everything `main` needs, read once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
  pub addr: SocketAddr,
  pub courses_dir: PathBuf,
  pub data_dir: PathBuf,
  pub agent: AgentConfig,
  pub provider: Option<ProviderConfig>,
}

impl Settings {
  pub fn from_env() -> Self {
    // Read port from env or default to 3000.
    let addr: SocketAddr = std::env::var("PORT")
      .ok()
      .and_then(|p| p.parse::<u16>().ok())
      .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
      .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
    let courses_dir = std::env::var("MINDGYM_COURSES_DIR").unwrap_or_else(|_| "./courses".into()).into();
    let data_dir = std::env::var("MINDGYM_DATA_DIR").unwrap_or_else(|_| "./data".into()).into();
    Self {
      addr,
      courses_dir,
      data_dir,
      agent: load_agent_config_from_env().unwrap_or_default(),
      provider: ProviderConfig::from_env(),
    }
  }
}
