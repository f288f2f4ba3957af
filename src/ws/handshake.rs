use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::validator::validate_token;
use crate::models::{AuthFrame, ServerMessage, TaskSnapshot};
use crate::ws::session::ManagerSession;
use crate::AppState;

/// Upgrade-capable endpoint for manager dashboard connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state machine.
///
/// Connected -> AwaitingAuth -> Authenticated -> Streaming -> Closed, with
/// Rejected terminal from AwaitingAuth. Authentication happens exactly
/// once; after streaming starts, client frames are read only to notice
/// the disconnect.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // AwaitingAuth: the first text frame must be an authenticate message.
    let frame = match read_first_text_frame(&mut receiver).await {
        FirstFrame::Text(frame) => frame,
        FirstFrame::Invalid => {
            send_auth_error(&mut sender, "Invalid message format").await;
            return;
        }
        FirstFrame::Gone => return,
    };

    let token = match parse_auth_frame(&frame) {
        Ok(token) => token,
        Err(reason) => {
            warn!("Rejecting connection: {}", reason);
            send_auth_error(&mut sender, reason).await;
            return;
        }
    };

    let config = &state.config;
    let manager_id = match validate_token(
        &token,
        &config.jwt_token,
        &config.jwt_issuer,
        &config.jwt_audience,
    ) {
        Ok(manager_id) => manager_id,
        Err(e) => {
            warn!("JWT validation failed for connection: {}", e);
            send_auth_error(&mut sender, &e.to_string()).await;
            return;
        }
    };

    // The signature only proves who the token was issued to; the cache
    // decides whether it is still the manager's current token.
    if !state.token_cache.verify(manager_id, &token).await {
        warn!("Token liveness check failed for manager {}", manager_id);
        send_auth_error(&mut sender, "Token not found or expired").await;
        return;
    }

    let (team_id, sprint_id) = match state.db.manager_team_and_sprint(manager_id).await {
        Ok(scope) => scope,
        Err(e) => {
            error!("Failed to resolve scope for manager {}: {}", manager_id, e);
            send_auth_error(&mut sender, "Manager data not found").await;
            return;
        }
    };

    // Authenticated: the handshake still owns the socket for this write.
    if send_message(&mut sender, &ServerMessage::AuthSuccess).await.is_err() {
        error!("Failed to send auth success to manager {}", manager_id);
        return;
    }
    info!("Authentication successful for manager {}", manager_id);

    // From here on a single writer task owns the sink. Both the initial
    // snapshot and the fan-out loop go through the session channel, so no
    // two tasks ever write to the same socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let conn_id = Uuid::new_v4();
    state
        .registry
        .register(
            conn_id,
            ManagerSession {
                tx: tx.clone(),
                manager_id,
                team_id,
                sprint_id,
            },
        )
        .await;

    // Streaming: full snapshot first, then the completion sentinel.
    send_initial_snapshot(&state, manager_id, &tx).await;

    // Read and discard further client frames. The protocol is push-only
    // after the handshake, but the pending read keeps disconnect
    // detection live.
    loop {
        match receiver.next().await {
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                info!("WebSocket connection closed for manager {}: {}", manager_id, e);
                break;
            }
            None => {
                info!("WebSocket connection closed for manager {}", manager_id);
                break;
            }
        }
    }

    state.registry.unregister(conn_id).await;
}

enum FirstFrame {
    Text(String),
    Invalid,
    Gone,
}

async fn read_first_text_frame(receiver: &mut SplitStream<WebSocket>) -> FirstFrame {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => return FirstFrame::Text(text),
            // Transport keepalives are fine before the auth frame.
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => {
                info!("Connection closed before authentication");
                return FirstFrame::Gone;
            }
            Some(Ok(_)) => {
                warn!("Non-text frame received while awaiting authentication");
                return FirstFrame::Invalid;
            }
            Some(Err(e)) => {
                error!("Failed to read authentication message: {}", e);
                return FirstFrame::Gone;
            }
        }
    }
}

/// Extract the bearer token from the first client frame.
fn parse_auth_frame(frame: &str) -> Result<String, &'static str> {
    let auth: AuthFrame = serde_json::from_str(frame).map_err(|_| "Invalid message format")?;
    match (auth.action.as_deref(), auth.token) {
        (Some("authenticate"), Some(token)) if !token.is_empty() => Ok(token),
        _ => Err("Missing authentication"),
    }
}

/// Build the initial snapshot sequence: one `task_update` per in-scope
/// task, terminated by exactly one `initial_tasks` sentinel.
fn initial_snapshot_messages(tasks: Vec<TaskSnapshot>) -> Vec<ServerMessage> {
    let mut messages: Vec<ServerMessage> = tasks.into_iter().map(ServerMessage::task_update).collect();
    messages.push(ServerMessage::InitialTasks);
    messages
}

async fn send_initial_snapshot(
    state: &AppState,
    manager_id: Uuid,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let tasks = match state.db.manager_tasks(manager_id).await {
        Ok(tasks) => tasks,
        Err(e) => {
            error!("Failed to get initial tasks for manager {}: {}", manager_id, e);
            return;
        }
    };

    info!("Sending {} initial tasks to manager {}", tasks.len(), manager_id);
    for msg in initial_snapshot_messages(tasks) {
        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!("Error serializing initial task for manager {}: {}", manager_id, e);
                continue;
            }
        };
        if tx.send(Message::Text(text)).is_err() {
            warn!("Connection for manager {} closed during initial snapshot", manager_id);
            return;
        }
    }
    info!("Successfully sent all initial tasks to manager {}", manager_id);
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

async fn send_auth_error(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let msg = ServerMessage::AuthError(reason.to_string());
    if let Err(e) = send_message(sender, &msg).await {
        error!("Failed to send auth error message: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn auth_frame_with_token_is_accepted() {
        let token = parse_auth_frame(r#"{"action":"authenticate","token":"abc.def.ghi"}"#).unwrap();
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn unparseable_frame_is_invalid_format() {
        assert_eq!(parse_auth_frame("not json"), Err("Invalid message format"));
    }

    #[test]
    fn wrong_action_is_missing_authentication() {
        assert_eq!(
            parse_auth_frame(r#"{"action":"subscribe","token":"abc"}"#),
            Err("Missing authentication")
        );
    }

    #[test]
    fn missing_or_empty_token_is_missing_authentication() {
        assert_eq!(
            parse_auth_frame(r#"{"action":"authenticate"}"#),
            Err("Missing authentication")
        );
        assert_eq!(
            parse_auth_frame(r#"{"action":"authenticate","token":""}"#),
            Err("Missing authentication")
        );
    }

    fn task(name: &str) -> TaskSnapshot {
        TaskSnapshot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            total_duration: Duration::ZERO,
            in_progress: false,
            developer_name: String::new(),
            status: String::new(),
            is_started: false,
            is_paused: false,
            is_stopped: true,
            start_time: None,
            update_time: Utc::now(),
        }
    }

    #[test]
    fn snapshot_sequence_ends_with_single_sentinel() {
        let messages = initial_snapshot_messages(vec![task("a"), task("b")]);
        assert_eq!(messages.len(), 3);
        assert!(matches!(&messages[0], ServerMessage::Task(ev) if ev.action == "task_update"));
        assert!(matches!(&messages[1], ServerMessage::Task(ev) if ev.action == "task_update"));
        assert!(matches!(messages[2], ServerMessage::InitialTasks));
    }

    #[test]
    fn empty_scope_still_gets_the_sentinel() {
        let messages = initial_snapshot_messages(Vec::new());
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::InitialTasks));
    }
}
