//! Application state: live sessions, stores, the judge client and course sources.
//!
//! This module owns:
//!   - the session map (id → `SessionHandle`), one orchestrator per session
//!   - the progress store and the local course library
//!   - the official catalog
//!   - the judge (HTTP provider, or a stand-in when none is configured)

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::coach::{Coach, SessionHandle};
use crate::config::{AgentConfig, Settings};
use crate::course::{load_course, Course};
use crate::error::{LookupError, SessionError, StoreError};
use crate::generator::CourseGenerator;
use crate::judge::{HttpJudge, Judge, UnconfiguredJudge};
use crate::library::LocalLibrary;
use crate::progress::{FileProgressStore, ProgressStore};
use crate::protocol::CourseSource;
use crate::session::CourseIdentity;
use crate::validation::ValidationOrchestrator;

pub const PROGRESS_FILE: &str = "progress.json";
pub const LIBRARY_FILE: &str = "local_courses.json";

pub struct AppState {
  pub sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
  pub coach: Coach,
  pub judge: Arc<dyn Judge>,
  pub agent: AgentConfig,
  pub catalog: Catalog,
  pub library: LocalLibrary,
  pub generator: CourseGenerator,
  /// `(provider, model)` for the health endpoint; None when no provider is configured.
  pub provider_label: Option<(String, String)>,
}

impl AppState {
  pub fn new(
    judge: Arc<dyn Judge>,
    progress: Arc<dyn ProgressStore>,
    catalog: Catalog,
    library: LocalLibrary,
    agent: AgentConfig,
  ) -> Self {
    Self {
      sessions: RwLock::new(HashMap::new()),
      coach: Coach::new(progress, agent.messages.clone()),
      generator: CourseGenerator::new(judge.clone(), agent.prompts.clone(), agent.timeouts.generate()),
      judge,
      agent,
      catalog,
      library,
      provider_label: None,
    }
  }

  /// Build state from settings: open stores under the data dir, load the catalog, init the judge.
  #[instrument(level = "info", skip_all)]
  pub async fn from_settings(settings: &Settings) -> Result<Self, StoreError> {
    let progress: Arc<dyn ProgressStore> =
      Arc::new(FileProgressStore::open(settings.data_dir.join(PROGRESS_FILE)).await?);
    let library = LocalLibrary::open(settings.data_dir.join(LIBRARY_FILE), progress.clone()).await?;
    let catalog = match Catalog::load(&settings.courses_dir).await {
      Ok(c) => c,
      Err(e) => {
        error!(target: "mindgym", error = %e, dir = %settings.courses_dir.display(), "Failed to load catalog; continuing without it");
        Catalog::empty()
      }
    };

    let mut provider_label = None;
    let judge: Arc<dyn Judge> = match &settings.provider {
      Some(p) => match HttpJudge::new(p.clone(), settings.agent.timeouts.generate()) {
        Ok(j) => {
          info!(target: "mindgym", provider = ?p.kind, base_url = %p.base_url, model = %p.model, "Judge enabled.");
          provider_label = Some((format!("{:?}", p.kind).to_lowercase(), p.model.clone()));
          Arc::new(j)
        }
        Err(e) => {
          error!(target: "mindgym", error = %e, "Failed to build judge client; answers get fallback feedback");
          Arc::new(UnconfiguredJudge)
        }
      },
      None => {
        error!(target: "mindgym", "No usable judge provider; answers get fallback feedback");
        Arc::new(UnconfiguredJudge)
      }
    };

    let mut state = Self::new(judge, progress, catalog, library, settings.agent.clone());
    state.provider_label = provider_label;
    Ok(state)
  }

  /// Register a fresh idle session.
  #[instrument(level = "debug", skip(self))]
  pub async fn create_session(&self) -> Arc<SessionHandle> {
    let id = Uuid::new_v4().to_string();
    let orchestrator = ValidationOrchestrator::new(
      self.judge.clone(),
      self.agent.prompts.judge_template.clone(),
      self.agent.timeouts.judge(),
    );
    let handle = Arc::new(SessionHandle::new(id.clone(), orchestrator));
    self.sessions.write().await.insert(id, handle.clone());
    handle
  }

  pub async fn session(&self, id: &str) -> Result<Arc<SessionHandle>, SessionError> {
    self
      .sessions
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| SessionError::UnknownSession(id.to_string()))
  }

  /// Drop a session; a judgement still in flight is cancelled.
  pub async fn remove_session(&self, id: &str) -> Result<(), SessionError> {
    let handle = self
      .sessions
      .write()
      .await
      .remove(id)
      .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
    self.coach.exit(&handle).await;
    Ok(())
  }

  /// Drop every session idle for at least `ttl`. Returns how many were evicted.
  #[instrument(level = "debug", skip(self))]
  pub async fn evict_idle(&self, ttl: Duration) -> usize {
    let mut stale = Vec::new();
    for (id, handle) in self.sessions.read().await.iter() {
      if handle.idle_for().await >= ttl {
        stale.push(id.clone());
      }
    }
    let mut evicted = 0;
    for id in stale {
      if self.remove_session(&id).await.is_ok() {
        evicted += 1;
      }
    }
    if evicted > 0 {
      info!(target: "session", evicted, "Evicted idle sessions");
    }
    evicted
  }

  /// Periodically evict idle sessions. Clients that never DELETE their session still free it.
  pub fn spawn_session_sweeper(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
    let state = Arc::clone(self);
    let period = (ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      loop {
        interval.tick().await;
        let evicted = state.evict_idle(ttl).await;
        debug!(target: "session", evicted, "Session sweep done");
      }
    })
  }

  /// Fetch and validate the course a client asked for, with the identity its progress is kept under.
  #[instrument(level = "info", skip(self, source))]
  pub async fn resolve_course(&self, source: CourseSource) -> Result<(Course, CourseIdentity), LookupError> {
    match source {
      CourseSource::Catalog { id } => {
        let course = self.catalog.load_course(&id).await?;
        Ok((course, CourseIdentity::Catalog(id)))
      }
      CourseSource::Local { id } => {
        let course = self.library.get(&id).await?;
        Ok((course, CourseIdentity::Local(id)))
      }
      CourseSource::Inline { course } => Ok((load_course(course)?, CourseIdentity::new_upload())),
    }
  }

  pub fn completion_text(&self) -> &str {
    &self.agent.messages.completion
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::progress::MemoryProgressStore;
  use crate::validation::testing::ScriptedJudge;

  fn state() -> AppState {
    let progress: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
    let library = LocalLibrary::in_memory(progress.clone());
    let judge = Arc::new(ScriptedJudge::always(r#"{"isCorrect": true, "feedback": ""}"#));
    AppState::new(judge, progress, Catalog::empty(), library, AgentConfig::default())
  }

  #[tokio::test(start_paused = true)]
  async fn idle_sessions_are_evicted() {
    let state = state();
    let old = state.create_session().await;
    tokio::time::sleep(Duration::from_secs(50)).await;
    let fresh = state.create_session().await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(state.evict_idle(Duration::from_secs(60)).await, 1);
    assert_eq!(state.session(&old.id).await.err(), Some(SessionError::UnknownSession(old.id.clone())));
    assert!(state.session(&fresh.id).await.is_ok());
  }

  #[tokio::test(start_paused = true)]
  async fn activity_keeps_a_session_alive() {
    let state = Arc::new(state());
    let handle = state.create_session().await;
    let sweeper = state.spawn_session_sweeper(Duration::from_secs(60));
    for _ in 0..5 {
      tokio::time::sleep(Duration::from_secs(40)).await;
      drop(handle.lock().await);
    }
    assert!(state.session(&handle.id).await.is_ok());

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(state.session(&handle.id).await.is_err());
    sweeper.abort();
  }
}
