//! Render/replay boundary. A UI implements `Renderer`; `replay` materializes a
//! progress log into it. `Transcript` is the plain-text renderer the API returns
//! and the tests use to compare transcripts.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::course::{Course, Exercise, Module};
use crate::progress::{Command, Role};

pub const DEFAULT_COMPLETION_TEXT: &str = "🎉 Course complete! Pick a new course.";

pub trait Renderer {
  /// Called for every `ShowModuleHeader`; implementations dedupe by module id.
  fn show_module_header(&mut self, module: &Module);
  fn show_question(&mut self, exercise: &Exercise);
  fn add_message(&mut self, role: Role, text: &str, thinking: bool);
  /// Remove the oldest visible thinking indicator, if any.
  fn hide_thinking(&mut self);
  fn complete_course(&mut self);
}

/// Apply one command. Commands naming ids the course no longer has are skipped.
pub fn apply<R: Renderer + ?Sized>(renderer: &mut R, course: &Course, cmd: &Command) {
  match cmd {
    Command::ShowModuleHeader { module_id } => match course.module(module_id) {
      Some(m) => renderer.show_module_header(m),
      None => warn!(target: "session", %module_id, "Replay: unknown module; header skipped"),
    },
    Command::ShowQuestion { exercise_id } => match course.exercise(exercise_id) {
      Some(e) => renderer.show_question(e),
      None => warn!(target: "session", %exercise_id, "Replay: unknown exercise; question skipped"),
    },
    Command::AddMessage { role, text, thinking } => renderer.add_message(*role, text, *thinking),
    Command::HideThinking => renderer.hide_thinking(),
    Command::CompleteCourse => renderer.complete_course(),
  }
}

/// Replay a whole log in order.
pub fn replay<R: Renderer + ?Sized>(renderer: &mut R, course: &Course, log: &[Command]) {
  for cmd in log {
    apply(renderer, course, cmd);
  }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
  ModuleHeader { module_id: String, title: String, description: String },
  Message { role: Role, text: String, thinking: bool },
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Transcript {
  pub entries: Vec<TranscriptEntry>,
  pub completed: bool,
  #[serde(skip)]
  shown_headers: HashSet<String>,
  #[serde(skip)]
  completion_text: String,
}

impl Default for Transcript {
  fn default() -> Self {
    Self::with_completion_text(DEFAULT_COMPLETION_TEXT)
  }
}

impl Transcript {
  pub fn with_completion_text(text: impl Into<String>) -> Self {
    Self { entries: Vec::new(), completed: false, shown_headers: HashSet::new(), completion_text: text.into() }
  }

  /// Convenience: fresh transcript with `log` replayed into it.
  pub fn from_log(course: &Course, log: &[Command]) -> Self {
    let mut t = Self::default();
    replay(&mut t, course, log);
    t
  }
}

impl Renderer for Transcript {
  fn show_module_header(&mut self, module: &Module) {
    if self.shown_headers.insert(module.id.clone()) {
      self.entries.push(TranscriptEntry::ModuleHeader {
        module_id: module.id.clone(),
        title: module.title.clone(),
        description: module.description.clone(),
      });
    }
  }

  fn show_question(&mut self, exercise: &Exercise) {
    self.add_message(Role::Coach, &exercise.prompt, false);
  }

  fn add_message(&mut self, role: Role, text: &str, thinking: bool) {
    self.entries.push(TranscriptEntry::Message { role, text: text.to_string(), thinking });
  }

  fn hide_thinking(&mut self) {
    let pos = self
      .entries
      .iter()
      .position(|e| matches!(e, TranscriptEntry::Message { thinking: true, .. }));
    if let Some(i) = pos {
      self.entries.remove(i);
    }
  }

  fn complete_course(&mut self) {
    let text = self.completion_text.clone();
    self.add_message(Role::Coach, &text, false);
    self.completed = true;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::course::fixtures::two_module_course;

  #[test]
  fn header_is_deduped_and_thinking_hidden() {
    let course = two_module_course();
    let log = vec![
      Command::ShowModuleHeader { module_id: "m1".into() },
      Command::ShowQuestion { exercise_id: "e1".into() },
      Command::user("my answer"),
      Command::thinking("Thinking (25s)"),
      Command::HideThinking,
      Command::coach("💡 Hint e1"),
      Command::ShowModuleHeader { module_id: "m1".into() },
    ];
    let t = Transcript::from_log(&course, &log);
    assert_eq!(t.entries.len(), 4);
    assert!(matches!(&t.entries[0], TranscriptEntry::ModuleHeader { module_id, .. } if module_id == "m1"));
    assert!(matches!(&t.entries[1], TranscriptEntry::Message { text, .. } if text == "Prompt e1"));
    assert!(t.entries.iter().all(|e| !matches!(e, TranscriptEntry::Message { thinking: true, .. })));
    assert!(!t.completed);
  }

  #[test]
  fn unknown_ids_are_skipped_and_completion_rendered() {
    let course = two_module_course();
    let log = vec![
      Command::ShowModuleHeader { module_id: "gone".into() },
      Command::ShowQuestion { exercise_id: "gone".into() },
      Command::CompleteCourse,
    ];
    let t = Transcript::from_log(&course, &log);
    assert_eq!(t.entries.len(), 1);
    assert!(t.completed);
  }
}
