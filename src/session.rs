//! Session state machine: `Idle → InModule(module, index) → Completed`.
//!
//! The session owns the course, the identity it is persisted under, and the
//! progress log. The pointer (`InModule`) is always derivable from the log: on
//! resume it is rebuilt from the last `ShowQuestion`, never read from storage.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::course::{Course, Exercise};
use crate::error::SessionError;
use crate::progress::{Command, ProgressKey, ProgressLog};
use crate::render::{replay, Renderer};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
  Idle,
  InModule { module_id: String, exercise_index: usize },
  Completed,
}

/// Who a course is, for progress purposes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CourseIdentity {
  /// Official catalog entry id.
  Catalog(String),
  /// Course authored/edited by the user and kept in the local library.
  Local(String),
  /// One-off uploaded file; id is generated per upload.
  Upload(String),
}

impl CourseIdentity {
  pub fn new_upload() -> Self {
    CourseIdentity::Upload(Uuid::new_v4().to_string())
  }

  /// Id used in the progress key. Local and upload ids are namespaced so they
  /// can't collide with catalog ids.
  pub fn course_id(&self) -> String {
    match self {
      CourseIdentity::Catalog(id) => id.clone(),
      CourseIdentity::Local(id) => format!("__local__{id}"),
      CourseIdentity::Upload(id) => format!("__upload__{id}"),
    }
  }
}

#[derive(Debug)]
pub struct Session {
  course: Option<Course>,
  identity: Option<CourseIdentity>,
  state: SessionState,
  log: ProgressLog,
  in_flight: u32,
  epoch: u64,
}

impl Default for Session {
  fn default() -> Self {
    Self::new()
  }
}

impl Session {
  pub fn new() -> Self {
    Self { course: None, identity: None, state: SessionState::Idle, log: Vec::new(), in_flight: 0, epoch: 0 }
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  pub fn log(&self) -> &[Command] {
    &self.log
  }

  pub fn course(&self) -> Option<&Course> {
    self.course.as_ref()
  }

  pub fn identity(&self) -> Option<&CourseIdentity> {
    self.identity.as_ref()
  }

  /// Bumped by start/resume/reset/exit. A judgement that settles under a different
  /// epoch belongs to a transcript that no longer exists.
  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  pub fn progress_key(&self) -> Option<ProgressKey> {
    let course = self.course.as_ref()?;
    let identity = self.identity.as_ref()?;
    Some(ProgressKey::new(identity.course_id(), course.version()))
  }

  /// The send control: off while a judgement is pending and once the course is done.
  pub fn input_enabled(&self) -> bool {
    self.in_flight == 0 && matches!(self.state, SessionState::InModule { .. })
  }

  /// Load a course and seed the log with the first module header and question.
  #[instrument(level = "info", skip_all, fields(title = %course.metadata.title, ?identity))]
  pub fn start(&mut self, course: Course, identity: CourseIdentity) -> Result<Vec<Command>, SessionError> {
    let (state, seed) = seed_for(&course)?;
    self.course = Some(course);
    self.identity = Some(identity);
    self.install(state, seed.clone());
    info!(target: "session", "Session started");
    Ok(seed)
  }

  /// Restore a session from a saved log. The pointer is derived from the log;
  /// a log with no resolvable question is discarded and the course starts over.
  #[instrument(level = "info", skip_all, fields(title = %course.metadata.title, ?identity, log_len = saved_log.len()))]
  pub fn resume(
    &mut self,
    course: Course,
    identity: CourseIdentity,
    saved_log: ProgressLog,
  ) -> Result<(), SessionError> {
    match derive_state(&course, &saved_log) {
      Some(state) => {
        debug!(target: "session", ?state, "Pointer derived from saved log");
        self.course = Some(course);
        self.identity = Some(identity);
        self.install(state, saved_log);
        Ok(())
      }
      None => {
        warn!(target: "session", "Saved log has no usable question; starting fresh");
        self.start(course, identity).map(|_| ())
      }
    }
  }

  /// Back to the first module / first exercise with a two-command log.
  /// Clearing the stored log is the caller's job (it owns the store).
  #[instrument(level = "info", skip(self))]
  pub fn reset(&mut self) -> Result<Vec<Command>, SessionError> {
    let course = self.course.as_ref().ok_or(SessionError::NoActiveExercise)?;
    let (state, seed) = seed_for(course)?;
    self.install(state, seed.clone());
    info!(target: "session", "Session reset");
    Ok(seed)
  }

  /// Leave the course entirely.
  pub fn exit(&mut self) {
    self.course = None;
    self.identity = None;
    self.install(SessionState::Idle, Vec::new());
  }

  pub fn current_exercise(&self) -> Option<&Exercise> {
    let SessionState::InModule { module_id, exercise_index } = &self.state else {
      return None;
    };
    let course = self.course.as_ref()?;
    course.exercises_of(module_id).get(*exercise_index).copied()
  }

  /// Move past the current exercise after a correct answer.
  #[instrument(level = "info", skip(self), fields(state = ?self.state))]
  pub fn advance_on_correct(&mut self) -> Result<Vec<Command>, SessionError> {
    let course = self.course.as_ref().ok_or(SessionError::NoActiveExercise)?;
    let SessionState::InModule { module_id, exercise_index } = &self.state else {
      return Err(SessionError::NoActiveExercise);
    };

    let exercises = course.exercises_of(module_id);
    let (next_state, emitted) = if let Some(next) = exercises.get(exercise_index + 1) {
      (
        SessionState::InModule { module_id: module_id.clone(), exercise_index: exercise_index + 1 },
        vec![Command::ShowQuestion { exercise_id: next.id.clone() }],
      )
    } else if let Some(next_module) = course.next_module_after(module_id) {
      let first = course
        .exercises_of(&next_module.id)
        .first()
        .map(|e| e.id.clone())
        .ok_or_else(|| SessionError::EmptyModule(next_module.id.clone()))?;
      (
        SessionState::InModule { module_id: next_module.id.clone(), exercise_index: 0 },
        vec![
          Command::ShowModuleHeader { module_id: next_module.id.clone() },
          Command::ShowQuestion { exercise_id: first },
        ],
      )
    } else {
      (SessionState::Completed, vec![Command::CompleteCourse])
    };

    debug!(target: "session", from = ?self.state, to = ?next_state, "Advance");
    self.state = next_state;
    self.log.extend(emitted.iter().cloned());
    Ok(emitted)
  }

  /// Append the user's answer, trimmed. Only valid while an exercise is active.
  pub fn record_user_answer(&mut self, answer: &str) -> Result<Command, SessionError> {
    let answer = answer.trim();
    if answer.is_empty() {
      return Err(SessionError::EmptyAnswer);
    }
    if self.current_exercise().is_none() {
      return Err(SessionError::NoActiveExercise);
    }
    Ok(self.push(Command::user(answer)))
  }

  /// Append the thinking indicator and mark a judgement pending; input is off until `hide_thinking`.
  pub fn show_thinking(&mut self, text: &str) -> Command {
    self.in_flight += 1;
    self.push(Command::thinking(text))
  }

  /// Close one pending judgement: the thinking indicator goes away exactly once.
  pub fn hide_thinking(&mut self) -> Command {
    self.in_flight = self.in_flight.saturating_sub(1);
    self.push(Command::HideThinking)
  }

  pub fn add_coach_message(&mut self, text: impl Into<String>) -> Command {
    self.push(Command::coach(text))
  }

  /// Replay the whole log into a renderer.
  pub fn replay_into<R: Renderer + ?Sized>(&self, renderer: &mut R) {
    if let Some(course) = &self.course {
      replay(renderer, course, &self.log);
    }
  }

  fn push(&mut self, cmd: Command) -> Command {
    self.log.push(cmd.clone());
    cmd
  }

  fn install(&mut self, state: SessionState, log: ProgressLog) {
    self.state = state;
    self.log = log;
    self.in_flight = 0;
    self.epoch += 1;
  }
}

/// First module (lowest order) and its easiest exercise.
fn seed_for(course: &Course) -> Result<(SessionState, Vec<Command>), SessionError> {
  let first_module = course.first_module().ok_or(SessionError::EmptyCourse)?;
  let first_exercise = course
    .exercises_of(&first_module.id)
    .first()
    .map(|e| e.id.clone())
    .ok_or(SessionError::EmptyCourse)?;
  Ok((
    SessionState::InModule { module_id: first_module.id.clone(), exercise_index: 0 },
    vec![
      Command::ShowModuleHeader { module_id: first_module.id.clone() },
      Command::ShowQuestion { exercise_id: first_exercise },
    ],
  ))
}

/// Pointer implied by a log: position of the last resolvable `ShowQuestion`, or
/// `Completed` when a `CompleteCourse` follows it.
pub fn derive_state(course: &Course, log: &[Command]) -> Option<SessionState> {
  let (question_at, (module_id, exercise_index)) = log.iter().enumerate().rev().find_map(|(i, cmd)| match cmd {
    Command::ShowQuestion { exercise_id } => course.position_of(exercise_id).map(|p| (i, p)),
    _ => None,
  })?;
  let completed = log[question_at..].iter().any(|c| matches!(c, Command::CompleteCourse));
  Some(if completed { SessionState::Completed } else { SessionState::InModule { module_id, exercise_index } })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::course::fixtures::*;
  use crate::render::Transcript;

  fn started() -> Session {
    let mut s = Session::new();
    s.start(two_module_course(), CourseIdentity::Catalog("emotions".into())).unwrap();
    s
  }

  fn question(id: &str) -> Command {
    Command::ShowQuestion { exercise_id: id.into() }
  }

  fn header(id: &str) -> Command {
    Command::ShowModuleHeader { module_id: id.into() }
  }

  #[test]
  fn new_session_is_idle() {
    let s = Session::new();
    assert_eq!(s.state(), &SessionState::Idle);
    assert!(s.current_exercise().is_none());
    assert!(!s.input_enabled());
  }

  #[test]
  fn start_seeds_header_and_first_question() {
    let s = started();
    assert_eq!(s.log(), &[header("m1"), question("e1")]);
    assert_eq!(s.state(), &SessionState::InModule { module_id: "m1".into(), exercise_index: 0 });
    assert_eq!(s.current_exercise().unwrap().id, "e1");
    assert!(s.input_enabled());
  }

  #[test]
  fn start_uses_lowest_order_and_easiest_exercise() {
    let course = course(
      vec![module("late", 5), module("early", 2)],
      vec![exercise("x", "late", 1), exercise("hard", "early", 3), exercise("easy", "early", 1)],
    );
    let mut s = Session::new();
    let seed = s.start(course, CourseIdentity::new_upload()).unwrap();
    assert_eq!(seed, vec![header("early"), question("easy")]);
  }

  #[test]
  fn start_fails_when_first_module_is_empty() {
    let course = course(vec![module("m1", 1), module("m2", 2)], vec![exercise("e", "m2", 1)]);
    let mut s = Session::new();
    assert_eq!(s.start(course, CourseIdentity::new_upload()), Err(SessionError::EmptyCourse));
    assert_eq!(s.state(), &SessionState::Idle);
  }

  #[test]
  fn walks_the_two_module_scenario() {
    let mut s = started();
    assert_eq!(s.advance_on_correct().unwrap(), vec![question("e2")]);
    assert_eq!(s.state(), &SessionState::InModule { module_id: "m1".into(), exercise_index: 1 });

    assert_eq!(s.advance_on_correct().unwrap(), vec![header("m2"), question("e3")]);
    assert_eq!(s.current_exercise().unwrap().id, "e3");

    assert_eq!(s.advance_on_correct().unwrap(), vec![Command::CompleteCourse]);
    assert_eq!(s.state(), &SessionState::Completed);
    assert!(s.current_exercise().is_none());
    assert!(!s.input_enabled());
    assert_eq!(s.advance_on_correct(), Err(SessionError::NoActiveExercise));
  }

  #[test]
  fn gap_in_module_order_completes_course() {
    let course = course(
      vec![module("m1", 1), module("m3", 3)],
      vec![exercise("e1", "m1", 1), exercise("e3", "m3", 1)],
    );
    let mut s = Session::new();
    s.start(course, CourseIdentity::new_upload()).unwrap();
    assert_eq!(s.advance_on_correct().unwrap(), vec![Command::CompleteCourse]);
  }

  #[test]
  fn empty_successor_module_is_an_error_and_keeps_state() {
    let course = course(vec![module("m1", 1), module("m2", 2)], vec![exercise("e1", "m1", 1)]);
    let mut s = Session::new();
    s.start(course, CourseIdentity::new_upload()).unwrap();
    let before = s.log().to_vec();
    assert_eq!(s.advance_on_correct(), Err(SessionError::EmptyModule("m2".into())));
    assert_eq!(s.log(), before.as_slice());
    assert_eq!(s.current_exercise().unwrap().id, "e1");
  }

  #[test]
  fn reset_yields_exactly_two_commands() {
    let mut s = started();
    s.advance_on_correct().unwrap();
    s.record_user_answer("x").unwrap();
    s.show_thinking("Thinking");
    let epoch = s.epoch();
    let seed = s.reset().unwrap();
    assert_eq!(seed, vec![header("m1"), question("e1")]);
    assert_eq!(s.log(), seed.as_slice());
    assert!(s.input_enabled());
    assert_ne!(s.epoch(), epoch);
  }

  #[test]
  fn answer_bookkeeping_toggles_input() {
    let mut s = started();
    s.record_user_answer("joy").unwrap();
    s.show_thinking("Thinking");
    assert!(!s.input_enabled());
    assert_eq!(s.hide_thinking(), Command::HideThinking);
    assert!(s.input_enabled());
    assert_eq!(s.log().len(), 5);
  }

  #[test]
  fn answer_requires_active_exercise() {
    let mut s = Session::new();
    assert_eq!(s.record_user_answer("x"), Err(SessionError::NoActiveExercise));
    assert!(s.log().is_empty());
  }

  #[test]
  fn answer_is_trimmed_and_blank_is_rejected() {
    let mut s = started();
    let seeded = s.log().len();
    assert_eq!(s.record_user_answer(" \t "), Err(SessionError::EmptyAnswer));
    assert_eq!(s.log().len(), seeded);
    assert_eq!(s.record_user_answer("  joy \n"), Ok(Command::user("joy")));
  }

  #[test]
  fn resume_restores_pointer_and_transcript() {
    let mut s = started();
    s.record_user_answer("a").unwrap();
    s.show_thinking("Thinking");
    s.hide_thinking();
    s.add_coach_message("✅ Correct!");
    s.advance_on_correct().unwrap();
    s.advance_on_correct().unwrap();

    let saved = s.log().to_vec();
    let mut original = Transcript::default();
    s.replay_into(&mut original);

    let mut restored = Session::new();
    restored.resume(two_module_course(), CourseIdentity::Catalog("emotions".into()), saved.clone()).unwrap();
    assert_eq!(restored.state(), s.state());
    assert_eq!(restored.log(), saved.as_slice());
    let mut again = Transcript::default();
    restored.replay_into(&mut again);
    assert_eq!(again, original);
  }

  #[test]
  fn resume_of_completed_log_stays_completed() {
    let mut s = started();
    for _ in 0..3 {
      s.advance_on_correct().unwrap();
    }
    let mut restored = Session::new();
    restored.resume(two_module_course(), CourseIdentity::new_upload(), s.log().to_vec()).unwrap();
    assert_eq!(restored.state(), &SessionState::Completed);
  }

  #[test]
  fn resume_tracks_reordered_array_by_difficulty() {
    // Same exercises, array order shuffled: e2 is still index 1 of m1.
    let mut shuffled = two_module_course();
    shuffled.exercises.reverse();
    let log = vec![header("m1"), question("e1"), question("e2")];
    let mut s = Session::new();
    s.resume(shuffled, CourseIdentity::new_upload(), log).unwrap();
    assert_eq!(s.state(), &SessionState::InModule { module_id: "m1".into(), exercise_index: 1 });
  }

  #[test]
  fn resume_with_unusable_log_starts_fresh() {
    let mut s = Session::new();
    s.resume(two_module_course(), CourseIdentity::new_upload(), vec![question("deleted")]).unwrap();
    assert_eq!(s.log(), &[header("m1"), question("e1")]);
  }

  #[test]
  fn identities_are_namespaced() {
    assert_eq!(CourseIdentity::Catalog("x".into()).course_id(), "x");
    assert_eq!(CourseIdentity::Local("x".into()).course_id(), "__local__x");
    assert!(CourseIdentity::new_upload().course_id().starts_with("__upload__"));
  }

  #[test]
  fn progress_key_uses_course_version() {
    let mut course = two_module_course();
    course.metadata.version = Some("3.2".into());
    let mut s = Session::new();
    s.start(course, CourseIdentity::Catalog("c".into())).unwrap();
    assert_eq!(s.progress_key(), Some(ProgressKey::new("c", "3.2")));
  }
}
