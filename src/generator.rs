//! LLM-assisted authoring: a whole course from a topic, or one more module /
//! exercise for an existing course. Replies go through the same fence stripping
//! and validation as imported files.

use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::Prompts;
use crate::course::{parse_course, Course, Exercise, Module};
use crate::error::{CourseError, GenerateError, JudgeError};
use crate::judge::{ChatMessage, Judge};
use crate::util::{fill_template, strip_code_fence, trunc_for_log};

const COURSE_MAX_TOKENS: u32 = 8000;
const ITEM_MAX_TOKENS: u32 = 1000;

pub struct CourseGenerator {
  judge: Arc<dyn Judge>,
  prompts: Prompts,
  timeout: Duration,
}

impl CourseGenerator {
  pub fn new(judge: Arc<dyn Judge>, prompts: Prompts, timeout: Duration) -> Self {
    Self { judge, prompts, timeout }
  }

  #[instrument(level = "info", skip(self), fields(topic_len = topic.len()))]
  pub async fn generate_course(&self, topic: &str) -> Result<Course, GenerateError> {
    let topic = topic.trim();
    if topic.is_empty() {
      return Err(GenerateError::EmptyTopic);
    }
    let system = fill_template(&self.prompts.course_system_template, &[("style_guide", &self.prompts.course_style_guide)]);
    let user = fill_template(&self.prompts.course_user_template, &[("topic", topic)]);
    let raw = self.call(system, user, COURSE_MAX_TOKENS).await?;
    let course = parse_course(strip_code_fence(&raw))?;
    info!(target: "mindgym", title = %course.metadata.title, modules = course.modules.len(), exercises = course.exercises.len(), "Course generated");
    Ok(course)
  }

  /// A new module placed after the current last one.
  #[instrument(level = "info", skip_all, fields(title = %course.metadata.title))]
  pub async fn generate_module(&self, course: &Course) -> Result<Module, GenerateError> {
    let order = course.modules.iter().map(|m| m.order).max().unwrap_or(0).saturating_add(1);
    let system = fill_template(&self.prompts.module_system_template, &[("order", &order.to_string())]);
    let user = fill_template(&self.prompts.module_user_template, &[("course_title", &course.metadata.title)]);
    let mut module: Module = parse_item(&self.call(system, user, ITEM_MAX_TOKENS).await?)?;

    if module.order != order {
      warn!(target: "mindgym", got = module.order, want = order, "Generated module order corrected");
      module.order = order;
    }
    if module.id.trim().is_empty() || course.module(&module.id).is_some() {
      module.id = fresh_id("m");
    }
    Ok(module)
  }

  #[instrument(level = "info", skip(self, course))]
  pub async fn generate_exercise(&self, course: &Course, module_id: &str) -> Result<Exercise, GenerateError> {
    let module = course
      .module(module_id)
      .ok_or_else(|| CourseError::InvalidCourse(format!("unknown module '{module_id}'")))?;
    let system = fill_template(&self.prompts.exercise_system_template, &[("module_id", module_id)]);
    let user = fill_template(&self.prompts.exercise_user_template, &[("module_title", &module.title)]);
    let mut exercise: Exercise = parse_item(&self.call(system, user, ITEM_MAX_TOKENS).await?)?;

    exercise.module_id = module_id.to_string();
    if exercise.id.trim().is_empty() || course.exercise(&exercise.id).is_some() {
      exercise.id = fresh_id("e");
    }
    if exercise.prompt.trim().is_empty() || exercise.expected_answer.trim().is_empty() {
      return Err(CourseError::InvalidCourse("generated exercise has no prompt or answer".into()).into());
    }
    Ok(exercise)
  }

  async fn call(&self, system: String, user: String, max_tokens: u32) -> Result<String, GenerateError> {
    let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
    match tokio::time::timeout(self.timeout, self.judge.complete(messages, max_tokens)).await {
      Ok(reply) => Ok(reply?),
      Err(_) => Err(JudgeError::Timeout(self.timeout.as_secs()).into()),
    }
  }
}

fn parse_item<T: DeserializeOwned>(raw: &str) -> Result<T, CourseError> {
  let clean = strip_code_fence(raw);
  serde_json::from_str(clean)
    .map_err(|e| CourseError::InvalidCourse(format!("{e}; got: {}", trunc_for_log(clean, 80))))
}

fn fresh_id(prefix: &str) -> String {
  format!("{prefix}-{}", &Uuid::new_v4().simple().to_string()[..8])
}
