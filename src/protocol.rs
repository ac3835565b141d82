//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coach::TurnResult;
use crate::course::{Course, Exercise, Module};
use crate::progress::Command;
use crate::render::Transcript;
use crate::session::{CourseIdentity, Session, SessionState};

/// Where a session's course comes from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CourseSource {
  Catalog { id: String },
  Local { id: String },
  /// A course document supplied by the client (file upload / paste); gets a fresh upload identity.
  Inline { course: Value },
}

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
  Ping,
  StartSession { source: CourseSource },
  SubmitAnswer { answer: String },
  ResetSession,
  ExitSession,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
  Pong,
  Session {
    session: SessionOut,
  },
  /// Commands appended to the log, to be applied in order.
  Commands {
    commands: Vec<Command>,
    #[serde(flatten)]
    state: SessionState,
    input_enabled: bool,
  },
  /// Seconds left before the pending judgement times out.
  Countdown {
    remaining: u64,
  },
  Settled {
    #[serde(flatten)]
    turn: TurnResult,
  },
  Error {
    message: String,
  },
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
  pub ok: bool,
  pub provider: Option<String>,
  pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartSessionIn {
  pub source: CourseSource,
  /// Reuse an existing session (course switch) instead of creating one.
  #[serde(default)]
  pub session_id: Option<String>,
}

/// Full snapshot of a session: raw log plus its rendered transcript.
#[derive(Debug, Serialize)]
pub struct SessionOut {
  pub session_id: String,
  pub course_title: Option<String>,
  pub identity: Option<CourseIdentity>,
  #[serde(flatten)]
  pub state: SessionState,
  pub input_enabled: bool,
  pub log: Vec<Command>,
  pub transcript: Transcript,
}

impl SessionOut {
  pub fn from_session(session_id: &str, session: &Session, completion_text: &str) -> Self {
    let mut transcript = Transcript::with_completion_text(completion_text);
    session.replay_into(&mut transcript);
    Self {
      session_id: session_id.to_string(),
      course_title: session.course().map(|c| c.metadata.title.clone()),
      identity: session.identity().cloned(),
      state: session.state().clone(),
      input_enabled: session.input_enabled(),
      log: session.log().to_vec(),
      transcript,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
  pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportIn {
  pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportIn {
  pub course: Course,
}

#[derive(Debug, Serialize)]
pub struct ExportOut {
  pub file_name: String,
  pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateCourseIn {
  pub topic: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateModuleIn {
  pub course: Course,
}

#[derive(Debug, Serialize)]
pub struct GenerateModuleOut {
  pub module: Module,
}

#[derive(Debug, Deserialize)]
pub struct GenerateExerciseIn {
  pub course: Course,
  pub module_id: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateExerciseOut {
  pub exercise: Exercise,
}

#[derive(Debug, Deserialize)]
pub struct LocalCourseIn {
  #[serde(default)]
  pub id: Option<String>,
  pub course: Course,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_client_messages() {
    let m: ClientWsMessage =
      serde_json::from_str(r#"{"type": "start_session", "source": {"kind": "catalog", "id": "emotions"}}"#).unwrap();
    assert!(matches!(m, ClientWsMessage::StartSession { source: CourseSource::Catalog { id } } if id == "emotions"));

    let m: ClientWsMessage = serde_json::from_str(r#"{"type": "submit_answer", "answer": "joy"}"#).unwrap();
    assert!(matches!(m, ClientWsMessage::SubmitAnswer { answer } if answer == "joy"));
    assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type": "reset_session"}"#).is_ok());
  }

  #[test]
  fn server_messages_are_flat() {
    let msg = ServerWsMessage::Commands {
      commands: vec![Command::HideThinking],
      state: SessionState::InModule { module_id: "m1".into(), exercise_index: 0 },
      input_enabled: true,
    };
    let v = serde_json::to_value(&msg).unwrap();
    assert_eq!(v["type"], "commands");
    assert_eq!(v["state"], "in_module");
    assert_eq!(v["module_id"], "m1");
    assert_eq!(v["commands"][0]["type"], "HIDE_THINKING");

    let v = serde_json::to_value(ServerWsMessage::Countdown { remaining: 24 }).unwrap();
    assert_eq!(v, serde_json::json!({"type": "countdown", "remaining": 24}));
  }
}
