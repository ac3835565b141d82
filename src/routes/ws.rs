//! WebSocket upgrade + message loop. Each socket owns one session. Client messages
//! are parsed as JSON and forwarded to the coach; judgements run in a spawned task
//! that streams countdown ticks and the settled turn back through a channel.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{info, error, instrument, debug};

use crate::coach::SessionHandle;
use crate::protocol::{ClientWsMessage, ServerWsMessage, SessionOut};
use crate::state::AppState;
use crate::validation::TickFn;

type Outbox = mpsc::UnboundedSender<ServerWsMessage>;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "mindgym", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  let handle = state.create_session().await;
  info!(target: "mindgym", session = %handle.id, "WebSocket connected");
  let (tx, mut rx) = mpsc::unbounded_channel::<ServerWsMessage>();

  loop {
    tokio::select! {
      incoming = socket.recv() => match incoming {
        Some(Ok(Message::Text(txt))) => match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(msg) => {
            debug!(target: "mindgym", "WS received: {:?}", &msg);
            handle_client_ws(msg, &state, &handle, &tx).await;
          }
          Err(e) => {
            let _ = tx.send(ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) });
          }
        },
        Some(Ok(Message::Ping(payload))) => {
          let _ = socket.send(Message::Pong(payload)).await;
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Err(e)) => {
          error!(target: "mindgym", error = %e, "WS receive error");
          break;
        }
        Some(Ok(_)) => {}
      },
      Some(out) = rx.recv() => {
        let out = serde_json::to_string(&out).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });
        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "mindgym", error = %e, "WS send error");
          break;
        }
      }
    }
  }

  if let Err(e) = state.remove_session(&handle.id).await {
    debug!(target: "mindgym", error = %e, "Session already gone");
  }
  info!(target: "mindgym", session = %handle.id, "WebSocket disconnected");
}

#[instrument(level = "info", skip_all, fields(session = %handle.id))]
async fn handle_client_ws(msg: ClientWsMessage, state: &Arc<AppState>, handle: &Arc<SessionHandle>, tx: &Outbox) {
  match msg {
    ClientWsMessage::Ping => {
      let _ = tx.send(ServerWsMessage::Pong);
    }

    ClientWsMessage::StartSession { source } => {
      let opened = match state.resolve_course(source).await {
        Ok((course, identity)) => state.coach.open(handle, course, identity).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
      };
      match opened {
        Ok(_) => send_snapshot(state, handle, tx).await,
        Err(message) => {
          let _ = tx.send(ServerWsMessage::Error { message });
        }
      }
    }

    ClientWsMessage::SubmitAnswer { answer } => {
      let pending = match state.coach.begin(handle, &answer).await {
        Ok(p) => p,
        Err(e) => {
          let _ = tx.send(ServerWsMessage::Error { message: e.to_string() });
          return;
        }
      };
      {
        let session = handle.lock().await;
        let _ = tx.send(ServerWsMessage::Commands {
          commands: pending.commands.clone(),
          state: session.state().clone(),
          input_enabled: session.input_enabled(),
        });
      }

      // Judged off the socket loop so a later submit or reset can supersede it.
      let (state, handle, tx) = (state.clone(), handle.clone(), tx.clone());
      tokio::spawn(async move {
        let ticks = tx.clone();
        let on_tick: TickFn = Box::new(move |remaining: u64| {
          let _ = ticks.send(ServerWsMessage::Countdown { remaining });
        });
        let turn = state.coach.finish(&handle, pending, Some(on_tick)).await;
        tracing::info!(target: "session", outcome = turn.outcome, "WS answer judged");
        let _ = tx.send(ServerWsMessage::Settled { turn });
      });
    }

    ClientWsMessage::ResetSession => match state.coach.reset(handle).await {
      Ok(_) => send_snapshot(state, handle, tx).await,
      Err(e) => {
        let _ = tx.send(ServerWsMessage::Error { message: e.to_string() });
      }
    },

    ClientWsMessage::ExitSession => {
      state.coach.exit(handle).await;
      send_snapshot(state, handle, tx).await;
    }
  }
}

async fn send_snapshot(state: &AppState, handle: &SessionHandle, tx: &Outbox) {
  let session = handle.lock().await;
  let _ = tx.send(ServerWsMessage::Session {
    session: SessionOut::from_session(&handle.id, &session, state.completion_text()),
  });
}
