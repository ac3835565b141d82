//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::catalog::CatalogEntry;
use crate::coach::TurnResult;
use crate::course::{parse_course, Course};
use crate::error::ApiError;
use crate::library::LocalCourseSummary;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let (provider, model) = match &state.provider_label {
    Some((p, m)) => (Some(p.clone()), Some(m.clone())),
    None => (None, None),
  };
  Json(HealthOut { ok: true, provider, model })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_catalog(State(state): State<Arc<AppState>>) -> Json<Vec<CatalogEntry>> {
  Json(state.catalog.entries().to_vec())
}

#[instrument(level = "info", skip(state, body), fields(session_id = ?body.session_id))]
pub async fn http_start_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartSessionIn>,
) -> Result<Json<SessionOut>, ApiError> {
  let (course, identity) = state.resolve_course(body.source).await?;
  let handle = match body.session_id {
    Some(id) => state.session(&id).await?,
    None => state.create_session().await,
  };
  state.coach.open(&handle, course, identity).await?;
  let session = handle.lock().await;
  info!(target: "session", id = %handle.id, state = ?session.state(), "HTTP session opened");
  Ok(Json(SessionOut::from_session(&handle.id, &session, state.completion_text())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionOut>, ApiError> {
  let handle = state.session(&id).await?;
  let session = handle.lock().await;
  Ok(Json(SessionOut::from_session(&handle.id, &session, state.completion_text())))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.remove_session(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state, body), fields(answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<TurnResult>, ApiError> {
  let handle = state.session(&id).await?;
  let turn = state.coach.answer(&handle, &body.answer, None).await?;
  info!(target: "session", %id, outcome = turn.outcome, "HTTP answer judged");
  Ok(Json(turn))
}

#[instrument(level = "info", skip(state))]
pub async fn http_reset_session(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<SessionOut>, ApiError> {
  let handle = state.session(&id).await?;
  state.coach.reset(&handle).await?;
  let session = handle.lock().await;
  Ok(Json(SessionOut::from_session(&handle.id, &session, state.completion_text())))
}

#[instrument(level = "info", skip(body), fields(text_len = body.text.len()))]
pub async fn http_import_course(Json(body): Json<ImportIn>) -> Result<Json<Course>, ApiError> {
  let course = parse_course(&body.text)?;
  info!(target: "mindgym", title = %course.metadata.title, "Course imported");
  Ok(Json(course))
}

#[instrument(level = "info", skip(body), fields(title = %body.course.metadata.title))]
pub async fn http_export_course(Json(body): Json<ExportIn>) -> Result<Json<ExportOut>, ApiError> {
  let content = body.course.to_export_json()?;
  Ok(Json(ExportOut { file_name: body.course.export_file_name(), content }))
}

#[instrument(level = "info", skip(state, body), fields(topic_len = body.topic.len()))]
pub async fn http_generate_course(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateCourseIn>,
) -> Result<Json<Course>, ApiError> {
  Ok(Json(state.generator.generate_course(&body.topic).await?))
}

#[instrument(level = "info", skip(state, body), fields(title = %body.course.metadata.title))]
pub async fn http_generate_module(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateModuleIn>,
) -> Result<Json<GenerateModuleOut>, ApiError> {
  let module = state.generator.generate_module(&body.course).await?;
  Ok(Json(GenerateModuleOut { module }))
}

#[instrument(level = "info", skip(state, body), fields(module_id = %body.module_id))]
pub async fn http_generate_exercise(
  State(state): State<Arc<AppState>>,
  Json(body): Json<GenerateExerciseIn>,
) -> Result<Json<GenerateExerciseOut>, ApiError> {
  let exercise = state.generator.generate_exercise(&body.course, &body.module_id).await?;
  Ok(Json(GenerateExerciseOut { exercise }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_list_local_courses(State(state): State<Arc<AppState>>) -> Json<Vec<LocalCourseSummary>> {
  Json(state.library.list().await)
}

#[instrument(level = "info", skip(state, body), fields(id = ?body.id))]
pub async fn http_save_local_course(
  State(state): State<Arc<AppState>>,
  Json(body): Json<LocalCourseIn>,
) -> Result<Json<LocalCourseSummary>, ApiError> {
  Ok(Json(state.library.save(body.id, body.course).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_local_course(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<Course>, ApiError> {
  Ok(Json(state.library.get(&id).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_local_course(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
  state.library.delete(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}
