//! Official course catalog: `index.json` in the courses directory lists
//! `{id, file, title}` entries; each `file` is a course document next to it.
//! Without an index the directory is scanned and every valid `*.json` course is
//! listed under its file stem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::course::{parse_course, Course};
use crate::error::{LookupError, StoreError};

pub const INDEX_FILE: &str = "index.json";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
  pub id: String,
  pub file: String,
  pub title: String,
}

#[derive(Clone, Debug)]
pub struct Catalog {
  dir: PathBuf,
  entries: Vec<CatalogEntry>,
}

impl Catalog {
  #[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display()))]
  pub async fn load(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
    let dir = dir.as_ref().to_path_buf();
    let entries = match tokio::fs::read_to_string(dir.join(INDEX_FILE)).await {
      Ok(raw) => serde_json::from_str::<Vec<CatalogEntry>>(&raw)?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => scan_dir(&dir).await?,
      Err(e) => return Err(e.into()),
    };
    info!(target: "mindgym", courses = entries.len(), "Catalog loaded");
    Ok(Self { dir, entries })
  }

  pub fn empty() -> Self {
    Self { dir: PathBuf::new(), entries: Vec::new() }
  }

  pub fn entries(&self) -> &[CatalogEntry] {
    &self.entries
  }

  pub fn entry(&self, id: &str) -> Option<&CatalogEntry> {
    self.entries.iter().find(|e| e.id == id)
  }

  /// Read, parse and validate one catalog course. The source file name is kept
  /// in `metadata._filename`.
  #[instrument(level = "info", skip(self))]
  pub async fn load_course(&self, id: &str) -> Result<Course, LookupError> {
    let entry = self.entry(id).ok_or_else(|| LookupError::UnknownCourse(id.to_string()))?;
    let raw = tokio::fs::read_to_string(self.dir.join(&entry.file))
      .await
      .map_err(StoreError::from)?;
    let mut course = parse_course(&raw)?;
    course.metadata.source_file = Some(entry.file.clone());
    Ok(course)
  }
}

async fn scan_dir(dir: &Path) -> Result<Vec<CatalogEntry>, StoreError> {
  let mut entries = Vec::new();
  let mut rd = match tokio::fs::read_dir(dir).await {
    Ok(rd) => rd,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      warn!(target: "mindgym", dir = %dir.display(), "Courses directory missing; catalog is empty");
      return Ok(entries);
    }
    Err(e) => return Err(e.into()),
  };
  while let Some(item) = rd.next_entry().await? {
    let path = item.path();
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
      continue;
    }
    let (Some(stem), Some(file)) = (
      path.file_stem().and_then(|s| s.to_str()),
      path.file_name().and_then(|s| s.to_str()),
    ) else {
      continue;
    };
    let raw = tokio::fs::read_to_string(&path).await?;
    match parse_course(&raw) {
      Ok(course) => entries.push(CatalogEntry {
        id: stem.to_string(),
        file: file.to_string(),
        title: course.metadata.title,
      }),
      Err(e) => warn!(target: "mindgym", file = %file, error = %e, "Skipping invalid course file"),
    }
  }
  entries.sort_by(|a, b| a.id.cmp(&b.id));
  Ok(entries)
}
