use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// One live, authenticated manager connection.
///
/// `tx` feeds the connection's writer task; when the last clone is dropped
/// the writer exits and the socket is released.
#[derive(Debug, Clone)]
pub struct ManagerSession {
    pub tx: mpsc::UnboundedSender<Message>,
    pub manager_id: Uuid,
    pub team_id: Uuid,
    pub sprint_id: Option<Uuid>,
}

/// The set of currently-authenticated connections.
///
/// Mutations and full iterations exclude each other through the lock;
/// actual sends happen on a snapshot, outside the lock, so one slow
/// connection cannot stall another.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, ManagerSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under its connection id.
    ///
    /// Re-registering an id drops the previous session, which closes its
    /// connection instead of leaking it.
    pub async fn register(&self, conn_id: Uuid, session: ManagerSession) {
        let manager_id = session.manager_id;
        let mut sessions = self.sessions.write().await;
        if sessions.insert(conn_id, session).is_some() {
            warn!("Replaced existing session for connection {}", conn_id);
        }
        info!(
            "Added manager {} to active sessions (total: {})",
            manager_id,
            sessions.len()
        );
    }

    /// Remove a session. Idempotent: safe to call from both the
    /// handshake's read loop and the fan-out failure path.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.remove(&conn_id) {
            info!(
                "Removed manager {} from active sessions (remaining: {})",
                session.manager_id,
                sessions.len()
            );
        }
    }

    /// Consistent point-in-time copy of all sessions for one fan-out pass.
    pub async fn snapshot(&self) -> Vec<(Uuid, ManagerSession)> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(conn_id, session)| (*conn_id, session.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
