//! Course model: metadata, modules and exercises, plus the read-only queries the
//! session state machine relies on.
//!
//! Ordering rules:
//!   - modules are ordered by `order` ascending
//!   - exercises inside a module are ordered by `difficulty` ascending, ties keep array order
//!   - the module after `m` is the one whose `order` is exactly `m.order + 1` (gaps are dead ends)

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::error::CourseError;

pub const DEFAULT_COURSE_VERSION: &str = "1.0";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Course {
  pub metadata: CourseMetadata,
  #[serde(default)]
  pub modules: Vec<Module>,
  #[serde(default)]
  pub exercises: Vec<Exercise>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CourseMetadata {
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub validation_prompt: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  /// Catalog file the course was fetched from. Accepted on input, never exported.
  #[serde(rename = "_filename", default, skip_serializing)]
  pub source_file: Option<String>,
  /// Keys we don't interpret are carried through export untouched.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
  pub id: String,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub order: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exercise {
  pub id: String,
  pub module_id: String,
  pub prompt: String,
  pub expected_answer: String,
  #[serde(default)]
  pub feedback_on_error: String,
  pub difficulty: i64,
}

/// Parse a course from raw text (file upload, paste, LLM output after fence stripping).
/// Text that is not JSON at all is a `CorruptedImport`; JSON of the wrong shape is `InvalidCourse`.
pub fn parse_course(raw: &str) -> Result<Course, CourseError> {
  let value: Value =
    serde_json::from_str(raw).map_err(|e| CourseError::CorruptedImport(e.to_string()))?;
  load_course(value)
}

/// Deserialize and validate a course document.
#[instrument(level = "debug", skip(raw))]
pub fn load_course(raw: Value) -> Result<Course, CourseError> {
  if !raw.is_object() {
    return Err(CourseError::InvalidCourse("course must be a JSON object".into()));
  }
  let course: Course =
    serde_json::from_value(raw).map_err(|e| CourseError::InvalidCourse(e.to_string()))?;
  course.validate()?;
  Ok(course)
}

impl Course {
  /// Structural checks. Duplicate module `order` values are rejected so that
  /// `next_module_after` is never ambiguous.
  pub fn validate(&self) -> Result<(), CourseError> {
    let invalid = |msg: String| Err(CourseError::InvalidCourse(msg));

    if self.metadata.title.trim().is_empty() {
      return invalid("metadata.title is required".into());
    }
    if self.metadata.validation_prompt.trim().is_empty() {
      return invalid("metadata.validation_prompt is required".into());
    }
    if self.modules.is_empty() {
      return invalid("course has no modules".into());
    }
    if self.exercises.is_empty() {
      return invalid("course has no exercises".into());
    }

    let mut module_ids = HashSet::new();
    let mut orders = HashSet::new();
    for m in &self.modules {
      if !module_ids.insert(m.id.as_str()) {
        return invalid(format!("duplicate module id '{}'", m.id));
      }
      if !orders.insert(m.order) {
        return invalid(format!("duplicate module order {} (module '{}')", m.order, m.id));
      }
    }

    let mut exercise_ids = HashSet::new();
    for e in &self.exercises {
      if !exercise_ids.insert(e.id.as_str()) {
        return invalid(format!("duplicate exercise id '{}'", e.id));
      }
      if !module_ids.contains(e.module_id.as_str()) {
        return invalid(format!(
          "exercise '{}' references unknown module '{}'",
          e.id, e.module_id
        ));
      }
      if !(1..=3).contains(&e.difficulty) {
        warn!(target: "mindgym", exercise = %e.id, difficulty = e.difficulty, "Exercise difficulty outside 1..=3");
      }
    }

    for m in &self.modules {
      if !self.exercises.iter().any(|e| e.module_id == m.id) {
        warn!(target: "mindgym", module = %m.id, "Module has no exercises; the session cannot enter it");
      }
    }
    Ok(())
  }

  /// Version string used in the progress key.
  pub fn version(&self) -> &str {
    self.metadata.version.as_deref().unwrap_or(DEFAULT_COURSE_VERSION)
  }

  pub fn module(&self, id: &str) -> Option<&Module> {
    self.modules.iter().find(|m| m.id == id)
  }

  pub fn exercise(&self, id: &str) -> Option<&Exercise> {
    self.exercises.iter().find(|e| e.id == id)
  }

  /// Exercises of a module in play order (difficulty, then original position).
  pub fn exercises_of(&self, module_id: &str) -> Vec<&Exercise> {
    let mut out: Vec<&Exercise> = self.exercises.iter().filter(|e| e.module_id == module_id).collect();
    // sort_by_key is stable: equal difficulties keep array order.
    out.sort_by_key(|e| e.difficulty);
    out
  }

  pub fn modules_ordered(&self) -> Vec<&Module> {
    let mut out: Vec<&Module> = self.modules.iter().collect();
    out.sort_by_key(|m| m.order);
    out
  }

  pub fn first_module(&self) -> Option<&Module> {
    self.modules.iter().min_by_key(|m| m.order)
  }

  /// Strict successor: the module whose order is exactly `current.order + 1`.
  pub fn next_module_after(&self, module_id: &str) -> Option<&Module> {
    let current = self.module(module_id)?;
    let wanted = current.order.checked_add(1)?;
    self.modules.iter().find(|m| m.order == wanted)
  }

  /// Where an exercise sits in play order: `(module_id, index)`.
  pub fn position_of(&self, exercise_id: &str) -> Option<(String, usize)> {
    let exercise = self.exercise(exercise_id)?;
    let index = self
      .exercises_of(&exercise.module_id)
      .iter()
      .position(|e| e.id == exercise_id)?;
    Some((exercise.module_id.clone(), index))
  }

  /// Pretty JSON for download. Round-trips through `parse_course`.
  pub fn to_export_json(&self) -> Result<String, CourseError> {
    serde_json::to_string_pretty(self).map_err(|e| CourseError::InvalidCourse(e.to_string()))
  }

  /// Suggested download name: every whitespace run in the title becomes one `_`,
  /// including leading and trailing ones.
  pub fn export_file_name(&self) -> String {
    let mut stem = String::with_capacity(self.metadata.title.len());
    let mut in_run = false;
    for c in self.metadata.title.chars() {
      if !c.is_whitespace() {
        stem.push(c);
      } else if !in_run {
        stem.push('_');
      }
      in_run = c.is_whitespace();
    }
    format!("{stem}.json")
  }
}
