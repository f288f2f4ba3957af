use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

use crate::models::TaskSnapshot;

/// First frame expected from a client, decoded permissively so that each
/// wrong shape maps to its own rejection reason.
#[derive(Debug, Deserialize)]
pub struct AuthFrame {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// A task change enriched with a fresh snapshot. Produced by the ingest
/// adapter, consumed by the fan-out loop. `action` is forwarded verbatim
/// from the queue envelope.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub action: String,
    pub task_id: Uuid,
    pub task_data: TaskSnapshot,
}

/// Server-to-client wire message. Which fields are present is fixed per
/// variant rather than left to optional-field conventions.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    AuthSuccess,
    AuthError(String),
    InitialTasks,
    Task(TaskEvent),
}

impl ServerMessage {
    /// A `task_update` event for one task, as used in the initial snapshot.
    pub fn task_update(task: TaskSnapshot) -> Self {
        ServerMessage::Task(TaskEvent {
            action: "task_update".to_string(),
            task_id: task.id,
            task_data: task,
        })
    }
}

impl Serialize for ServerMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerMessage::AuthSuccess => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("action", "auth_success")?;
                map.end()
            }
            ServerMessage::AuthError(error) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("action", "auth_error")?;
                map.serialize_entry("error", error)?;
                map.end()
            }
            ServerMessage::InitialTasks => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("action", "initial_tasks")?;
                map.end()
            }
            ServerMessage::Task(event) => event.serialize(serializer),
        }
    }
}
