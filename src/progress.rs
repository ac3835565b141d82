//! Progress log: the replayable command sequence behind a chat transcript, and the
//! stores that persist it per (course identity, course version).
//!
//! The log is the source of truth. The session pointer is never stored; it is
//! rebuilt from the last `ShowQuestion` on replay.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::StoreError;
use crate::util::write_json_atomic;

pub const PROGRESS_KIND: &str = "mindgym_log";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Coach,
}

/// One transcript instruction. Serialized as `{"type": "SHOW_QUESTION", "exerciseId": "e1"}` etc.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
  ShowModuleHeader {
    #[serde(rename = "moduleId")]
    module_id: String,
  },
  ShowQuestion {
    #[serde(rename = "exerciseId")]
    exercise_id: String,
  },
  AddMessage {
    role: Role,
    text: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    thinking: bool,
  },
  HideThinking,
  CompleteCourse,
}

impl Command {
  pub fn coach(text: impl Into<String>) -> Self {
    Command::AddMessage { role: Role::Coach, text: text.into(), thinking: false }
  }

  pub fn user(text: impl Into<String>) -> Self {
    Command::AddMessage { role: Role::User, text: text.into(), thinking: false }
  }

  pub fn thinking(text: impl Into<String>) -> Self {
    Command::AddMessage { role: Role::Coach, text: text.into(), thinking: true }
  }
}

pub type ProgressLog = Vec<Command>;

/// Storage record key: `{"type":"mindgym_log","courseId":…,"version":…}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgressKey {
  #[serde(rename = "type")]
  pub kind: String,
  #[serde(rename = "courseId")]
  pub course_id: String,
  pub version: String,
}

impl ProgressKey {
  pub fn new(course_id: impl Into<String>, version: impl Into<String>) -> Self {
    Self { kind: PROGRESS_KIND.into(), course_id: course_id.into(), version: version.into() }
  }

  pub fn storage_key(&self) -> String {
    // Plain struct of strings; serialization cannot fail.
    serde_json::to_string(self).unwrap_or_default()
  }
}

/// Where logs live. `load` right after `save` returns an equal log; `clear` removes
/// every version stored for the course id.
#[async_trait]
pub trait ProgressStore: Send + Sync {
  async fn save(&self, key: &ProgressKey, log: &[Command]) -> Result<(), StoreError>;
  async fn load(&self, key: &ProgressKey) -> Result<Option<ProgressLog>, StoreError>;
  async fn clear(&self, course_id: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryProgressStore {
  logs: RwLock<HashMap<ProgressKey, ProgressLog>>,
}

impl MemoryProgressStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
  async fn save(&self, key: &ProgressKey, log: &[Command]) -> Result<(), StoreError> {
    self.logs.write().await.insert(key.clone(), log.to_vec());
    Ok(())
  }

  async fn load(&self, key: &ProgressKey) -> Result<Option<ProgressLog>, StoreError> {
    Ok(self.logs.read().await.get(key).cloned())
  }

  async fn clear(&self, course_id: &str) -> Result<(), StoreError> {
    self.logs.write().await.retain(|k, _| k.course_id != course_id);
    Ok(())
  }
}

/// Single JSON document on disk mapping storage keys to logs. Every mutation
/// rewrites the file; the in-memory copy serves reads.
pub struct FileProgressStore {
  path: PathBuf,
  logs: RwLock<HashMap<ProgressKey, ProgressLog>>,
}

impl FileProgressStore {
  #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
  pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    let mut logs = HashMap::new();
    match tokio::fs::read_to_string(&path).await {
      Ok(s) => {
        let raw: HashMap<String, ProgressLog> = serde_json::from_str(&s)?;
        for (k, log) in raw {
          match serde_json::from_str::<ProgressKey>(&k) {
            Ok(key) => {
              logs.insert(key, log);
            }
            Err(e) => warn!(target: "mindgym", key = %k, error = %e, "Skipping unreadable progress key"),
          }
        }
        info!(target: "mindgym", records = logs.len(), "Loaded progress store");
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!(target: "mindgym", "No progress file yet; starting empty");
      }
      Err(e) => return Err(e.into()),
    }
    Ok(Self { path, logs: RwLock::new(logs) })
  }

  async fn flush(&self, logs: &HashMap<ProgressKey, ProgressLog>) -> Result<(), StoreError> {
    let raw: HashMap<String, &ProgressLog> = logs.iter().map(|(k, v)| (k.storage_key(), v)).collect();
    write_json_atomic(&self.path, &raw).await
  }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
  async fn save(&self, key: &ProgressKey, log: &[Command]) -> Result<(), StoreError> {
    let mut logs = self.logs.write().await;
    logs.insert(key.clone(), log.to_vec());
    self.flush(&logs).await
  }

  async fn load(&self, key: &ProgressKey) -> Result<Option<ProgressLog>, StoreError> {
    Ok(self.logs.read().await.get(key).cloned())
  }

  async fn clear(&self, course_id: &str) -> Result<(), StoreError> {
    let mut logs = self.logs.write().await;
    let before = logs.len();
    logs.retain(|k, _| k.course_id != course_id);
    if logs.len() != before {
      self.flush(&logs).await?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample_log() -> ProgressLog {
    vec![
      Command::ShowModuleHeader { module_id: "m1".into() },
      Command::ShowQuestion { exercise_id: "e1".into() },
      Command::user("joy"),
      Command::thinking("Thinking (25s)"),
      Command::HideThinking,
      Command::coach("✅ Correct!"),
      Command::CompleteCourse,
    ]
  }

  #[test]
  fn commands_use_tagged_wire_format() {
    let v = serde_json::to_value(sample_log()).unwrap();
    assert_eq!(v[0], json!({"type": "SHOW_MODULE_HEADER", "moduleId": "m1"}));
    assert_eq!(v[1], json!({"type": "SHOW_QUESTION", "exerciseId": "e1"}));
    assert_eq!(v[2], json!({"type": "ADD_MESSAGE", "role": "user", "text": "joy"}));
    assert_eq!(v[3], json!({"type": "ADD_MESSAGE", "role": "coach", "text": "Thinking (25s)", "thinking": true}));
    assert_eq!(v[4], json!({"type": "HIDE_THINKING"}));
    assert_eq!(v[6], json!({"type": "COMPLETE_COURSE"}));
  }

  #[test]
  fn storage_key_matches_record_format() {
    let key = ProgressKey::new("emotions", "1.0");
    assert_eq!(key.storage_key(), r#"{"type":"mindgym_log","courseId":"emotions","version":"1.0"}"#);
  }

  #[tokio::test]
  async fn memory_store_save_load_clear() {
    let store = MemoryProgressStore::new();
    let v1 = ProgressKey::new("c1", "1.0");
    let v2 = ProgressKey::new("c1", "2.0");
    let other = ProgressKey::new("c2", "1.0");
    store.save(&v1, &sample_log()).await.unwrap();
    store.save(&v2, &sample_log()).await.unwrap();
    store.save(&other, &sample_log()).await.unwrap();

    assert_eq!(store.load(&v1).await.unwrap(), Some(sample_log()));
    store.clear("c1").await.unwrap();
    assert_eq!(store.load(&v1).await.unwrap(), None);
    assert_eq!(store.load(&v2).await.unwrap(), None);
    assert!(store.load(&other).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn file_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("mindgym-progress-{}", uuid::Uuid::new_v4()));
    let path = dir.join("progress.json");
    let key = ProgressKey::new("c1", "1.0");
    {
      let store = FileProgressStore::open(&path).await.unwrap();
      assert_eq!(store.load(&key).await.unwrap(), None);
      store.save(&key, &sample_log()).await.unwrap();
    }
    let reopened = FileProgressStore::open(&path).await.unwrap();
    assert_eq!(reopened.load(&key).await.unwrap(), Some(sample_log()));
    reopened.clear("c1").await.unwrap();

    let again = FileProgressStore::open(&path).await.unwrap();
    assert_eq!(again.load(&key).await.unwrap(), None);
    let _ = std::fs::remove_dir_all(dir);
  }
}
