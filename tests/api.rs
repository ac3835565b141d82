mod common;

use std::sync::Arc;

use axum::{
  body::Body,
  http::{Request, StatusCode},
  Router,
};
use mindgym::catalog::Catalog;
use mindgym::library::LocalLibrary;
use mindgym::progress::{MemoryProgressStore, ProgressStore};
use mindgym::routes::build_router;
use mindgym::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{agent_config, course_json, matching_judge};

fn app() -> Router {
  let progress: Arc<dyn ProgressStore> = Arc::new(MemoryProgressStore::new());
  let library = LocalLibrary::in_memory(progress.clone());
  let state = AppState::new(matching_judge(), progress, Catalog::empty(), library, agent_config());
  build_router(Arc::new(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let req = Request::builder()
    .method(method)
    .uri(uri)
    .header("content-type", "application/json")
    .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
    .unwrap();
  let res = app.clone().oneshot(req).await.unwrap();
  let status = res.status();
  let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
  let (status, body) = call(&app(), "GET", "/api/v1/health", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn inline_session_round_trip() {
  let app = app();
  let (status, started) = call(
    &app,
    "POST",
    "/api/v1/sessions",
    Some(json!({ "source": { "kind": "inline", "course": course_json() } })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(started["state"], "in_module");
  assert_eq!(started["module_id"], "m1");
  assert_eq!(started["identity"]["kind"], "upload");
  assert_eq!(started["log"].as_array().unwrap().len(), 2);
  let id = started["session_id"].as_str().unwrap().to_string();

  let (status, turn) = call(&app, "POST", &format!("/api/v1/sessions/{id}/answer"), Some(json!({ "answer": "anger" }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(turn["outcome"], "correct");
  assert_eq!(turn["exercise_index"], 1);
  assert_eq!(turn["input_enabled"], true);

  let (_, snapshot) = call(&app, "GET", &format!("/api/v1/sessions/{id}"), None).await;
  let entries = snapshot["transcript"]["entries"].as_array().unwrap();
  assert_eq!(entries[0]["kind"], "module_header");
  assert!(entries.iter().all(|e| e["thinking"] != true));

  let (_, reset) = call(&app, "POST", &format!("/api/v1/sessions/{id}/reset"), None).await;
  assert_eq!(reset["log"].as_array().unwrap().len(), 2);
  assert_eq!(reset["exercise_index"], 0);

  let (status, _) = call(&app, "DELETE", &format!("/api/v1/sessions/{id}"), None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, body) = call(&app, "GET", &format!("/api/v1/sessions/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].as_str().unwrap().contains("unknown session"));
}

#[tokio::test]
async fn invalid_courses_are_rejected() {
  let app = app();
  let (status, _) = call(&app, "POST", "/api/v1/courses/import", Some(json!({ "text": "{ definitely not json" }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let mut broken = course_json();
  broken["metadata"]["validation_prompt"] = "  ".into();
  let (status, body) = call(&app, "POST", "/api/v1/courses/import", Some(json!({ "text": broken.to_string() }))).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert!(body["error"].as_str().unwrap().starts_with("invalid course"));

  let (status, _) = call(
    &app,
    "POST",
    "/api/v1/sessions",
    Some(json!({ "source": { "kind": "catalog", "id": "missing" } })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_suggests_file_name() {
  let (status, body) = call(&app(), "POST", "/api/v1/courses/export", Some(json!({ "course": course_json() }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["file_name"], "Emotional_Intelligence_Basics.json");
  let content: Value = serde_json::from_str(body["content"].as_str().unwrap()).unwrap();
  assert_eq!(content["metadata"]["author"], "MindGym team");
}

#[tokio::test]
async fn local_course_library_crud() {
  let app = app();
  let (status, saved) =
    call(&app, "POST", "/api/v1/local-courses", Some(json!({ "id": "mine", "course": course_json() }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(saved, json!({ "id": "mine", "title": "Emotional Intelligence Basics" }));

  let (_, list) = call(&app, "GET", "/api/v1/local-courses", None).await;
  assert_eq!(list.as_array().unwrap().len(), 1);

  let (status, started) =
    call(&app, "POST", "/api/v1/sessions", Some(json!({ "source": { "kind": "local", "id": "mine" } }))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(started["identity"], json!({ "kind": "local", "id": "mine" }));

  let (status, _) = call(&app, "DELETE", "/api/v1/local-courses/mine", None).await;
  assert_eq!(status, StatusCode::NO_CONTENT);
  let (status, _) = call(&app, "GET", "/api/v1/local-courses/mine", None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blank_answer_is_a_bad_request() {
  let app = app();
  let (_, started) = call(
    &app,
    "POST",
    "/api/v1/sessions",
    Some(json!({ "source": { "kind": "inline", "course": course_json() } })),
  )
  .await;
  let id = started["session_id"].as_str().unwrap().to_string();
  let (status, body) = call(&app, "POST", &format!("/api/v1/sessions/{id}/answer"), Some(json!({ "answer": "  " }))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "answer is empty");

  let (_, snapshot) = call(&app, "GET", &format!("/api/v1/sessions/{id}"), None).await;
  assert_eq!(snapshot["log"].as_array().unwrap().len(), 2);
  assert_eq!(snapshot["input_enabled"], true);
}

#[tokio::test]
async fn answering_without_a_course_conflicts() {
  let app = app();
  let (_, started) = call(
    &app,
    "POST",
    "/api/v1/sessions",
    Some(json!({ "source": { "kind": "inline", "course": course_json() } })),
  )
  .await;
  let id = started["session_id"].as_str().unwrap().to_string();
  for answer in ["anger", "disappointment", "breathe"] {
    call(&app, "POST", &format!("/api/v1/sessions/{id}/answer"), Some(json!({ "answer": answer }))).await;
  }
  let (status, _) = call(&app, "POST", &format!("/api/v1/sessions/{id}/answer"), Some(json!({ "answer": "more" }))).await;
  assert_eq!(status, StatusCode::CONFLICT);
}
