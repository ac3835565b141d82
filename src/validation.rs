//! Validation orchestrator: one judge call at a time, raced against a timeout,
//! cancellable by the next submission, with a cosmetic per-second countdown.
//!
//! Outcomes:
//!   - `Correct` / `Incorrect`: the judge answered with a valid verdict
//!   - `Fallback`: timeout, malformed reply or transport failure (shown as neutral feedback)
//!   - `Superseded`: a newer submission cancelled this one (shown as nothing)

use std::{
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
  time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::course::Exercise;
use crate::error::JudgeError;
use crate::judge::{parse_verdict, ChatMessage, Judge};
use crate::util::fill_template;

const JUDGE_MAX_TOKENS: u32 = 2000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JudgeOutcome {
  Correct { feedback: String },
  Incorrect { feedback: String },
  Fallback { error: JudgeError },
  Superseded,
}

pub type TickFn = Box<dyn Fn(u64) + Send + Sync + 'static>;

/// Per-second "time remaining" callback bound to one request. Dropping it stops the ticks.
pub struct Countdown {
  handle: JoinHandle<()>,
}

impl Countdown {
  pub fn start(total: Duration, on_tick: TickFn) -> Self {
    let handle = tokio::spawn(async move {
      let mut remaining = total.as_secs();
      let mut interval = tokio::time::interval(Duration::from_secs(1));
      // The first tick completes immediately.
      interval.tick().await;
      while remaining > 0 {
        interval.tick().await;
        remaining -= 1;
        on_tick(remaining);
      }
    });
    Self { handle }
  }
}

impl Drop for Countdown {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

/// Render the single judge prompt from the course instructions and the exercise.
pub fn build_judge_prompt(template: &str, validation_prompt: &str, exercise: &Exercise, answer: &str) -> String {
  fill_template(
    template,
    &[
      ("validation_prompt", validation_prompt),
      ("situation", &exercise.prompt),
      ("expected", &exercise.expected_answer),
      ("answer", answer),
    ],
  )
}

pub struct ValidationOrchestrator {
  judge: Arc<dyn Judge>,
  template: String,
  timeout: Duration,
  next_id: AtomicU64,
  in_flight: Mutex<Option<(u64, CancellationToken)>>,
}

impl ValidationOrchestrator {
  pub fn new(judge: Arc<dyn Judge>, template: impl Into<String>, timeout: Duration) -> Self {
    Self { judge, template: template.into(), timeout, next_id: AtomicU64::new(1), in_flight: Mutex::new(None) }
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Cancel whatever is in flight (reset, course switch, exit).
  pub async fn cancel(&self) {
    if let Some((id, token)) = self.in_flight.lock().await.take() {
      debug!(target: "judge", request = id, "Cancelling in-flight validation");
      token.cancel();
    }
  }

  pub async fn is_idle(&self) -> bool {
    self.in_flight.lock().await.is_none()
  }

  /// Judge one answer. A call already in flight is cancelled first (last submit wins).
  #[instrument(level = "info", skip_all, fields(exercise = %exercise.id, answer_len = answer.len()))]
  pub async fn submit(
    &self,
    exercise: &Exercise,
    answer: &str,
    validation_prompt: &str,
    on_tick: Option<TickFn>,
  ) -> JudgeOutcome {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let token = CancellationToken::new();
    {
      let mut slot = self.in_flight.lock().await;
      if let Some((prev, prev_token)) = slot.replace((id, token.clone())) {
        debug!(target: "judge", superseded = prev, by = id, "Superseding in-flight validation");
        prev_token.cancel();
      }
    }

    let countdown = on_tick.map(|f| Countdown::start(self.timeout, f));
    let messages = vec![ChatMessage::user(build_judge_prompt(&self.template, validation_prompt, exercise, answer))];

    let result = tokio::select! {
      biased;
      _ = token.cancelled() => Err(JudgeError::Cancelled),
      r = tokio::time::timeout(self.timeout, self.judge.complete(messages, JUDGE_MAX_TOKENS)) => match r {
        Ok(r) => r,
        Err(_) => Err(JudgeError::Timeout(self.timeout.as_secs())),
      },
    };
    drop(countdown);

    {
      let mut slot = self.in_flight.lock().await;
      if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
        slot.take();
      }
    }

    let outcome = match result.and_then(|raw| parse_verdict(&raw)) {
      Ok(v) if v.is_correct => JudgeOutcome::Correct { feedback: v.feedback },
      Ok(v) => JudgeOutcome::Incorrect { feedback: v.feedback },
      Err(JudgeError::Cancelled) => JudgeOutcome::Superseded,
      Err(error) => {
        warn!(target: "judge", request = id, error = %error, "Validation failed; falling back");
        JudgeOutcome::Fallback { error }
      }
    };
    info!(target: "judge", request = id, outcome = outcome_label(&outcome), "Validation settled");
    outcome
  }
}

fn outcome_label(o: &JudgeOutcome) -> &'static str {
  match o {
    JudgeOutcome::Correct { .. } => "correct",
    JudgeOutcome::Incorrect { .. } => "incorrect",
    JudgeOutcome::Fallback { .. } => "fallback",
    JudgeOutcome::Superseded => "superseded",
  }
}

#[cfg(test)]
pub(crate) mod testing {
  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;

  use super::*;

  /// Judge that replays scripted `(delay, reply)` pairs, one per call; the last one repeats.
  pub struct ScriptedJudge {
    script: Vec<(Duration, Result<String, JudgeError>)>,
    calls: AtomicUsize,
    pub prompts: std::sync::Mutex<Vec<String>>,
  }

  impl ScriptedJudge {
    pub fn new(script: Vec<(Duration, Result<String, JudgeError>)>) -> Self {
      Self { script, calls: AtomicUsize::new(0), prompts: std::sync::Mutex::new(Vec::new()) }
    }

    pub fn always(reply: &str) -> Self {
      Self::new(vec![(Duration::ZERO, Ok(reply.to_string()))])
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl Judge for ScriptedJudge {
    async fn complete(&self, messages: Vec<ChatMessage>, _max_tokens: u32) -> Result<String, JudgeError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(m) = messages.last() {
        self.prompts.lock().unwrap().push(m.content.clone());
      }
      let (delay, reply) = self.script[n.min(self.script.len() - 1)].clone();
      tokio::time::sleep(delay).await;
      reply
    }
  }
}
