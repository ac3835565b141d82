//! Local course library: courses the user authored, generated or edited, kept in
//! one JSON file as `[{id, title, data}]`. Deleting a course also forgets its
//! progress (identity `Local(id)`).

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::course::{load_course, Course};
use crate::error::{LookupError, StoreError};
use crate::progress::ProgressStore;
use crate::session::CourseIdentity;
use crate::util::write_json_atomic;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalCourse {
  pub id: String,
  pub title: String,
  pub data: Course,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LocalCourseSummary {
  pub id: String,
  pub title: String,
}

pub struct LocalLibrary {
  path: Option<PathBuf>,
  courses: RwLock<Vec<LocalCourse>>,
  progress: Arc<dyn ProgressStore>,
}

impl LocalLibrary {
  /// Library that lives only in memory (tests, read-only deployments).
  pub fn in_memory(progress: Arc<dyn ProgressStore>) -> Self {
    Self { path: None, courses: RwLock::new(Vec::new()), progress }
  }

  #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
  pub async fn open(path: impl AsRef<Path>, progress: Arc<dyn ProgressStore>) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    let courses = match tokio::fs::read_to_string(&path).await {
      Ok(raw) => serde_json::from_str::<Vec<LocalCourse>>(&raw)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
      Err(e) => return Err(e.into()),
    };
    info!(target: "mindgym", courses = courses.len(), "Local library loaded");
    Ok(Self { path: Some(path), courses: RwLock::new(courses), progress })
  }

  pub async fn list(&self) -> Vec<LocalCourseSummary> {
    self
      .courses
      .read()
      .await
      .iter()
      .map(|c| LocalCourseSummary { id: c.id.clone(), title: c.title.clone() })
      .collect()
  }

  pub async fn get(&self, id: &str) -> Result<Course, LookupError> {
    self
      .courses
      .read()
      .await
      .iter()
      .find(|c| c.id == id)
      .map(|c| c.data.clone())
      .ok_or_else(|| LookupError::UnknownCourse(id.to_string()))
  }

  /// Insert or replace. The course is validated first; a missing id gets a fresh one.
  #[instrument(level = "info", skip(self, course), fields(title = %course.metadata.title))]
  pub async fn save(&self, id: Option<String>, course: Course) -> Result<LocalCourseSummary, LookupError> {
    let value = serde_json::to_value(&course).map_err(StoreError::from)?;
    let course = load_course(value)?;
    let id = id.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let entry = LocalCourse { id: id.clone(), title: course.metadata.title.clone(), data: course };

    let mut courses = self.courses.write().await;
    match courses.iter_mut().find(|c| c.id == id) {
      Some(existing) => *existing = entry.clone(),
      None => courses.push(entry.clone()),
    }
    self.flush(&courses).await?;
    debug!(target: "mindgym", %id, "Local course saved");
    Ok(LocalCourseSummary { id, title: entry.title })
  }

  #[instrument(level = "info", skip(self))]
  pub async fn delete(&self, id: &str) -> Result<(), LookupError> {
    let mut courses = self.courses.write().await;
    let before = courses.len();
    courses.retain(|c| c.id != id);
    if courses.len() == before {
      return Err(LookupError::UnknownCourse(id.to_string()));
    }
    self.flush(&courses).await?;
    drop(courses);
    self.progress.clear(&CourseIdentity::Local(id.to_string()).course_id()).await?;
    info!(target: "mindgym", %id, "Local course deleted");
    Ok(())
  }

  async fn flush(&self, courses: &[LocalCourse]) -> Result<(), StoreError> {
    match &self.path {
      Some(path) => write_json_atomic(path, courses).await,
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::course::fixtures::two_module_course;
  use crate::progress::{Command, MemoryProgressStore, ProgressKey};

  #[tokio::test]
  async fn save_get_list_and_replace() {
    let lib = LocalLibrary::in_memory(Arc::new(MemoryProgressStore::new()));
    let saved = lib.save(None, two_module_course()).await.unwrap();
    assert_eq!(saved.title, "Emotions");
    assert_eq!(lib.get(&saved.id).await.unwrap(), two_module_course());

    let mut edited = two_module_course();
    edited.metadata.title = "Emotions 2".into();
    lib.save(Some(saved.id.clone()), edited).await.unwrap();
    assert_eq!(lib.list().await, vec![LocalCourseSummary { id: saved.id, title: "Emotions 2".into() }]);
  }

  #[tokio::test]
  async fn invalid_course_is_not_saved() {
    let lib = LocalLibrary::in_memory(Arc::new(MemoryProgressStore::new()));
    let mut broken = two_module_course();
    broken.exercises.clear();
    assert!(matches!(lib.save(None, broken).await, Err(LookupError::Course(_))));
    assert!(lib.list().await.is_empty());
  }

  #[tokio::test]
  async fn delete_clears_progress() {
    let progress = Arc::new(MemoryProgressStore::new());
    let lib = LocalLibrary::in_memory(progress.clone());
    let saved = lib.save(Some("mine".into()), two_module_course()).await.unwrap();
    let key = ProgressKey::new(CourseIdentity::Local(saved.id.clone()).course_id(), "1.0");
    progress.save(&key, &[Command::CompleteCourse]).await.unwrap();

    lib.delete("mine").await.unwrap();
    assert!(progress.load(&key).await.unwrap().is_none());
    assert!(matches!(lib.delete("mine").await, Err(LookupError::UnknownCourse(_))));
  }

  #[tokio::test]
  async fn file_library_survives_reopen() {
    let path = std::env::temp_dir().join(format!("mindgym-library-{}.json", Uuid::new_v4()));
    let progress: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
    let lib = LocalLibrary::open(&path, progress.clone()).await.unwrap();
    lib.save(Some("a".into()), two_module_course()).await.unwrap();

    let again = LocalLibrary::open(&path, progress).await.unwrap();
    assert_eq!(again.get("a").await.unwrap().metadata.title, "Emotions");
  }
}
