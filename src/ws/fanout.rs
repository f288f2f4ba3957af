use async_trait::async_trait;
use axum::extract::ws::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{ServerMessage, TaskEvent, TaskScope};
use crate::ws::session::SessionRegistry;

/// Resolves which scope owns a task.
///
/// Answered fresh from the store for every broadcast message; stale
/// ownership would leak updates across teams.
#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    async fn task_scope(&self, task_id: Uuid) -> Result<Option<TaskScope>, sqlx::Error>;
}

/// Drain the broadcast queue and push each event to every authorized
/// session. Sole consumer of the queue; events leave in arrival order.
pub async fn run(
    mut events: mpsc::Receiver<TaskEvent>,
    registry: SessionRegistry,
    resolver: Arc<dyn OwnershipResolver>,
) {
    info!("Started fan-out loop for WebSocket broadcasts");
    while let Some(event) = events.recv().await {
        info!(
            "Processing broadcast message - action: {}, task: {}",
            event.action, event.task_id
        );
        dispatch(event, &registry, resolver.as_ref()).await;
    }
    warn!("Broadcast channel closed, fan-out loop exiting");
}

/// Deliver one event to every session whose team owns the task.
///
/// A failed send unregisters that one session only; delivery to the rest
/// of the pass continues.
async fn dispatch(event: TaskEvent, registry: &SessionRegistry, resolver: &dyn OwnershipResolver) {
    let task_id = event.task_id;

    let scope = match resolver.task_scope(task_id).await {
        Ok(Some(scope)) => scope,
        Ok(None) => {
            warn!("Task {} no longer exists, dropping broadcast", task_id);
            return;
        }
        Err(e) => {
            error!("Failed to resolve owning scope for task {}: {}", task_id, e);
            return;
        }
    };

    // Serialize once; every recipient gets the same payload.
    let payload = match serde_json::to_string(&ServerMessage::Task(event)) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Error serializing broadcast message: {}", e);
            return;
        }
    };

    let sessions = registry.snapshot().await;
    let checked = sessions.len();
    let mut sent = 0;

    for (conn_id, session) in sessions {
        if session.team_id != scope.team_id {
            debug!(
                "Task {} does not belong to manager {}'s team, skipping",
                task_id, session.manager_id
            );
            continue;
        }

        if session.tx.send(Message::Text(payload.clone())).is_err() {
            error!(
                "Error sending message to manager {}, closing session",
                session.manager_id
            );
            registry.unregister(conn_id).await;
        } else {
            sent += 1;
            debug!("Sent task {} update to manager {}", task_id, session.manager_id);
        }
    }

    info!("Broadcast completed - checked {} sessions, sent to {}", checked, sent);
}
