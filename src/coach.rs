//! The coach turn: glue between a `Session`, its `ValidationOrchestrator` and the
//! progress store.
//!
//! An answer runs in two phases so the session lock is never held across the
//! judge call:
//!   1. `begin`: append the user message and the thinking indicator, capture the
//!      exercise being judged and the session epoch
//!   2. `finish`: await the verdict, then re-lock and append the outcome, unless the
//!      session was reset/switched meanwhile (epoch changed)

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{
  sync::{Mutex, MutexGuard},
  time::Instant,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::CoachMessages;
use crate::course::{Course, Exercise};
use crate::error::SessionError;
use crate::progress::{Command, ProgressKey, ProgressStore};
use crate::session::{CourseIdentity, Session, SessionState};
use crate::util::fill_template;
use crate::validation::{JudgeOutcome, TickFn, ValidationOrchestrator};

/// One live session plus the orchestrator that judges its answers.
pub struct SessionHandle {
  pub id: String,
  session: Mutex<Session>,
  orchestrator: ValidationOrchestrator,
  last_active: Mutex<Instant>,
}

impl SessionHandle {
  pub fn new(id: impl Into<String>, orchestrator: ValidationOrchestrator) -> Self {
    Self {
      id: id.into(),
      session: Mutex::new(Session::new()),
      orchestrator,
      last_active: Mutex::new(Instant::now()),
    }
  }

  /// Lock the session; counts as activity for idle eviction.
  pub async fn lock(&self) -> MutexGuard<'_, Session> {
    *self.last_active.lock().await = Instant::now();
    self.session.lock().await
  }

  pub async fn idle_for(&self) -> Duration {
    self.last_active.lock().await.elapsed()
  }

  pub fn orchestrator(&self) -> &ValidationOrchestrator {
    &self.orchestrator
  }
}

/// Captured by `begin`, consumed by `finish`.
#[derive(Debug)]
pub struct PendingTurn {
  pub commands: Vec<Command>,
  exercise: Exercise,
  answer: String,
  validation_prompt: String,
  epoch: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct TurnResult {
  pub outcome: &'static str,
  /// Commands appended by this call, in log order.
  pub commands: Vec<Command>,
  #[serde(flatten)]
  pub state: SessionState,
  pub input_enabled: bool,
}

#[derive(Clone)]
pub struct Coach {
  store: Arc<dyn ProgressStore>,
  messages: CoachMessages,
}

impl Coach {
  pub fn new(store: Arc<dyn ProgressStore>, messages: CoachMessages) -> Self {
    Self { store, messages }
  }

  /// Start `course` under `identity`, resuming from the stored log when one exists.
  #[instrument(level = "info", skip_all, fields(session = %handle.id, ?identity))]
  pub async fn open(
    &self,
    handle: &SessionHandle,
    course: Course,
    identity: CourseIdentity,
  ) -> Result<Vec<Command>, SessionError> {
    let key = ProgressKey::new(identity.course_id(), course.version());
    let saved = match self.store.load(&key).await {
      Ok(saved) => saved,
      Err(e) => {
        warn!(target: "session", error = %e, "Could not read saved progress; starting fresh");
        None
      }
    };

    handle.orchestrator.cancel().await;
    let mut session = handle.lock().await;
    match saved {
      Some(log) => session.resume(course, identity, log)?,
      None => {
        session.start(course, identity)?;
      }
    }
    self.persist(&session).await;
    Ok(session.log().to_vec())
  }

  /// Phase 1 of an answer: user message + thinking indicator.
  #[instrument(level = "info", skip_all, fields(session = %handle.id, answer_len = answer.len()))]
  pub async fn begin(&self, handle: &SessionHandle, answer: &str) -> Result<PendingTurn, SessionError> {
    let answer = answer.trim();
    if answer.is_empty() {
      return Err(SessionError::EmptyAnswer);
    }
    let mut session = handle.lock().await;
    let exercise = session.current_exercise().cloned().ok_or(SessionError::NoActiveExercise)?;
    let validation_prompt = session.course().map(|c| c.metadata.validation_prompt.clone()).unwrap_or_default();

    let secs = handle.orchestrator.timeout().as_secs().to_string();
    let thinking = fill_template(&self.messages.thinking, &[("secs", &secs)]);
    let commands = vec![session.record_user_answer(answer)?, session.show_thinking(&thinking)];
    debug!(target: "session", exercise = %exercise.id, "Answer recorded; judging");

    Ok(PendingTurn {
      commands,
      exercise,
      answer: answer.to_string(),
      validation_prompt,
      epoch: session.epoch(),
    })
  }

  /// Phase 2 of an answer: judge, then append the outcome and persist.
  #[instrument(level = "info", skip_all, fields(session = %handle.id, exercise = %pending.exercise.id))]
  pub async fn finish(&self, handle: &SessionHandle, pending: PendingTurn, on_tick: Option<TickFn>) -> TurnResult {
    let outcome = handle
      .orchestrator
      .submit(&pending.exercise, &pending.answer, &pending.validation_prompt, on_tick)
      .await;

    let mut session = handle.lock().await;
    if session.epoch() != pending.epoch {
      debug!(target: "session", "Session changed while judging; verdict dropped");
      return TurnResult {
        outcome: "discarded",
        commands: Vec::new(),
        state: session.state().clone(),
        input_enabled: session.input_enabled(),
      };
    }

    let mut commands = vec![session.hide_thinking()];
    let still_current = session.current_exercise().map(|e| e.id == pending.exercise.id).unwrap_or(false);
    let label = match &outcome {
      JudgeOutcome::Superseded => "superseded",
      _ if !still_current => {
        debug!(target: "session", "Exercise already passed; verdict ignored");
        "stale"
      }
      JudgeOutcome::Correct { .. } => {
        commands.push(session.add_coach_message(self.messages.correct.clone()));
        let reference = fill_template(&self.messages.reference_answer, &[("expected", &pending.exercise.expected_answer)]);
        commands.push(session.add_coach_message(reference));
        match session.advance_on_correct() {
          Ok(emitted) => commands.extend(emitted),
          Err(e) => error!(target: "session", error = %e, "Cannot advance past exercise"),
        }
        "correct"
      }
      JudgeOutcome::Incorrect { feedback } => {
        let text = self.feedback_text(feedback, &pending.exercise);
        commands.push(session.add_coach_message(text));
        "incorrect"
      }
      JudgeOutcome::Fallback { error } => {
        let text = self.fallback_text(&pending.exercise);
        commands.push(session.add_coach_message(text));
        info!(target: "session", reason = %error, "Fallback feedback shown");
        "fallback"
      }
    };

    if !matches!(outcome, JudgeOutcome::Superseded) {
      self.persist(&session).await;
    }
    TurnResult { outcome: label, commands, state: session.state().clone(), input_enabled: session.input_enabled() }
  }

  /// Both phases back to back; returns every command appended by the turn.
  ///
  /// `finish` runs on its own task: when the caller is dropped mid-judgement the turn
  /// still settles, so the thinking indicator is hidden and input comes back.
  pub async fn answer(
    &self,
    handle: &Arc<SessionHandle>,
    answer: &str,
    on_tick: Option<TickFn>,
  ) -> Result<TurnResult, SessionError> {
    let pending = self.begin(handle, answer).await?;
    let mut head = pending.commands.clone();
    let settle = {
      let (coach, handle) = (self.clone(), handle.clone());
      tokio::spawn(async move { coach.finish(&handle, pending, on_tick).await })
    };
    let mut result = settle.await.map_err(|e| {
      error!(target: "session", session = %handle.id, error = %e, "Answer turn task failed");
      SessionError::TurnAborted(e.to_string())
    })?;
    head.append(&mut result.commands);
    result.commands = head;
    Ok(result)
  }

  /// Back to the first exercise. Cancels a pending judgement and forgets stored progress.
  #[instrument(level = "info", skip_all, fields(session = %handle.id))]
  pub async fn reset(&self, handle: &SessionHandle) -> Result<Vec<Command>, SessionError> {
    handle.orchestrator.cancel().await;
    let mut session = handle.lock().await;
    let seed = session.reset()?;
    if let Some(identity) = session.identity() {
      if let Err(e) = self.store.clear(&identity.course_id()).await {
        error!(target: "session", error = %e, "Failed to clear stored progress");
      }
    }
    Ok(seed)
  }

  #[instrument(level = "info", skip_all, fields(session = %handle.id))]
  pub async fn exit(&self, handle: &SessionHandle) {
    handle.orchestrator.cancel().await;
    handle.lock().await.exit();
  }

  fn feedback_text(&self, feedback: &str, exercise: &Exercise) -> String {
    let body = [feedback.trim(), exercise.feedback_on_error.trim()]
      .into_iter()
      .find(|s| !s.is_empty())
      .unwrap_or(self.messages.try_again.as_str());
    format!("{}{}", self.messages.feedback_prefix, body)
  }

  fn fallback_text(&self, exercise: &Exercise) -> String {
    let hint = exercise.feedback_on_error.trim();
    let body = if hint.is_empty() { self.messages.timeout_fallback.as_str() } else { hint };
    format!("{}{}", self.messages.feedback_prefix, body)
  }

  async fn persist(&self, session: &Session) {
    let Some(key) = session.progress_key() else { return };
    if let Err(e) = self.store.save(&key, session.log()).await {
      error!(target: "session", error = %e, key = %key.storage_key(), "Failed to save progress");
    }
  }
}
