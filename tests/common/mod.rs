//! Shared fixtures for integration tests: a course document and a judge that
//! compares the answer against the reference answer instead of calling an LLM.

#![allow(dead_code)]

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use async_trait::async_trait;
use mindgym::config::AgentConfig;
use mindgym::error::JudgeError;
use mindgym::judge::{ChatMessage, Judge};
use serde_json::{json, Value};

/// Prompt template understood by `MatchingJudge`.
pub const MATCH_TEMPLATE: &str = "{expected}\n{answer}";

/// Correct when the answer contains the reference answer (case-insensitive).
#[derive(Default)]
pub struct MatchingJudge {
  pub calls: AtomicUsize,
}

#[async_trait]
impl Judge for MatchingJudge {
  async fn complete(&self, messages: Vec<ChatMessage>, _max_tokens: u32) -> Result<String, JudgeError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
    let (expected, answer) = prompt.split_once('\n').unwrap_or((&prompt, ""));
    let ok = answer.to_lowercase().contains(&expected.to_lowercase());
    let feedback = if ok { "" } else { "Not quite" };
    Ok(format!("```json\n{}\n```", json!({ "isCorrect": ok, "feedback": feedback })))
  }
}

pub fn matching_judge() -> Arc<MatchingJudge> {
  Arc::new(MatchingJudge::default())
}

pub fn agent_config() -> AgentConfig {
  let mut cfg = AgentConfig::default();
  cfg.prompts.judge_template = MATCH_TEMPLATE.into();
  cfg
}

/// m1 (order 1): e2 (difficulty 2) listed before e1 (difficulty 1); m2 (order 2): e3.
pub fn course_json() -> Value {
  json!({
    "metadata": {
      "title": "Emotional Intelligence Basics",
      "description": "Name and handle feelings",
      "version": "1.0",
      "validation_prompt": "You are a coach. Accept answers that name the emotion.",
      "author": "MindGym team"
    },
    "modules": [
      { "id": "m2", "title": "Regulation", "description": "Calm down", "order": 2 },
      { "id": "m1", "title": "Recognition", "description": "Name it", "order": 1 }
    ],
    "exercises": [
      { "id": "e2", "module_id": "m1", "prompt": "Your friend cancels plans again.",
        "expected_answer": "disappointment", "feedback_on_error": "Think about expectations.", "difficulty": 2 },
      { "id": "e1", "module_id": "m1", "prompt": "A colleague takes credit for your work.",
        "expected_answer": "anger", "feedback_on_error": "What rises in your chest?", "difficulty": 1 },
      { "id": "e3", "module_id": "m2", "prompt": "You are about to snap at someone.",
        "expected_answer": "breathe", "feedback_on_error": "", "difficulty": 1 }
    ]
  })
}
