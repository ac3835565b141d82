//! Error taxonomy for course loading, sessions, judge calls and storage.
//!
//! Course and import errors are surfaced to the user immediately. Judge errors are
//! recovered locally by the coach turn (fallback feedback, input re-enabled).
//! `ApiError` is the HTTP rendering of all of them.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Problems with a course definition or an imported course document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CourseError {
  /// The document parsed but does not describe a usable course.
  #[error("invalid course: {0}")]
  InvalidCourse(String),
  /// The uploaded/pasted text is not a JSON course document at all.
  #[error("corrupted import: {0}")]
  CorruptedImport(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
  #[error("course has no playable first module")]
  EmptyCourse,
  #[error("module '{0}' has no exercises")]
  EmptyModule(String),
  /// Submitting while idle or after completion.
  #[error("no active exercise: select a course first")]
  NoActiveExercise,
  #[error("answer is empty")]
  EmptyAnswer,
  /// The task judging an answer died before it could settle the turn.
  #[error("answer turn aborted: {0}")]
  TurnAborted(String),
  #[error("unknown session: {0}")]
  UnknownSession(String),
}

/// Failures of a single judge (LLM) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JudgeError {
  #[error("judge did not answer within {0} seconds")]
  Timeout(u64),
  #[error("malformed judge response: {0}")]
  Malformed(String),
  #[error("judge transport error: {0}")]
  Transport(String),
  #[error("judge HTTP {status}: {message}")]
  Http { status: u16, message: String },
  /// Our own cancellation: a newer submission superseded this one.
  #[error("judge call cancelled")]
  Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("storage io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("storage encoding error: {0}")]
  Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for JudgeError {
  fn from(e: reqwest::Error) -> Self {
    JudgeError::Transport(e.to_string())
  }
}

/// Looking up a course by id in the catalog or the local library.
#[derive(Debug, Error)]
pub enum LookupError {
  #[error("unknown course: {0}")]
  UnknownCourse(String),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Course(#[from] CourseError),
}

/// Course, module or exercise generation.
#[derive(Debug, Error)]
pub enum GenerateError {
  #[error("course topic is empty")]
  EmptyTopic,
  #[error(transparent)]
  Judge(#[from] JudgeError),
  #[error(transparent)]
  Course(#[from] CourseError),
}

/// Everything an HTTP handler can fail with, rendered as `{"error": message}`.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error(transparent)]
  Session(#[from] SessionError),
  #[error(transparent)]
  Course(#[from] CourseError),
  #[error(transparent)]
  Lookup(#[from] LookupError),
  #[error(transparent)]
  Generate(#[from] GenerateError),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Session(SessionError::UnknownSession(_)) => StatusCode::NOT_FOUND,
      ApiError::Session(SessionError::NoActiveExercise) => StatusCode::CONFLICT,
      ApiError::Session(SessionError::EmptyAnswer) => StatusCode::BAD_REQUEST,
      ApiError::Session(SessionError::TurnAborted(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Session(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::Course(e) | ApiError::Lookup(LookupError::Course(e)) | ApiError::Generate(GenerateError::Course(e)) => {
        course_status(e)
      }
      ApiError::Lookup(LookupError::UnknownCourse(_)) => StatusCode::NOT_FOUND,
      ApiError::Lookup(LookupError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Generate(GenerateError::EmptyTopic) => StatusCode::BAD_REQUEST,
      ApiError::Generate(GenerateError::Judge(JudgeError::Timeout(_))) => StatusCode::GATEWAY_TIMEOUT,
      ApiError::Generate(GenerateError::Judge(_)) => StatusCode::BAD_GATEWAY,
    }
  }
}

fn course_status(e: &CourseError) -> StatusCode {
  match e {
    CourseError::InvalidCourse(_) => StatusCode::UNPROCESSABLE_ENTITY,
    CourseError::CorruptedImport(_) => StatusCode::BAD_REQUEST,
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(target: "mindgym", %status, error = %self, "Request failed");
    } else {
      warn!(target: "mindgym", %status, error = %self, "Request rejected");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
