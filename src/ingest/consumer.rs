use futures_util::StreamExt;
use lapin::options::{BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, Consumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::dbtasks::DbTasks;
use crate::models::TaskEvent;

/// Name of the durable work queue the store-side services publish to.
pub const TASK_QUEUE: &str = "task_queue";

/// Change notification envelope received from the work queue.
#[derive(Debug, PartialEq, Eq)]
pub struct TaskEnvelope {
    pub task_id: Uuid,
    pub action: String,
}

/// Why a queue envelope was dropped.
#[derive(Debug)]
pub enum EnvelopeError {
    Json(serde_json::Error),
    InvalidTaskId(uuid::Error),
    EmptyAction,
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeError::Json(e) => write!(f, "invalid envelope JSON: {}", e),
            EnvelopeError::InvalidTaskId(e) => write!(f, "invalid task_id: {}", e),
            EnvelopeError::EmptyAction => write!(f, "empty action"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Decode a queue envelope.
///
/// A malformed envelope cannot become valid by retrying, so the caller
/// drops it.
pub fn parse_envelope(body: &[u8]) -> Result<TaskEnvelope, EnvelopeError> {
    #[derive(serde::Deserialize)]
    struct RawEnvelope {
        task_id: String,
        action: String,
    }

    let raw: RawEnvelope = serde_json::from_slice(body).map_err(EnvelopeError::Json)?;
    let task_id = Uuid::parse_str(&raw.task_id).map_err(EnvelopeError::InvalidTaskId)?;
    if raw.action.is_empty() {
        return Err(EnvelopeError::EmptyAction);
    }
    Ok(TaskEnvelope {
        task_id,
        action: raw.action,
    })
}

/// A live consumer on the task queue. Holds the broker connection open
/// for the consumer's lifetime.
pub struct QueueConsumer {
    _conn: Connection,
    consumer: Consumer,
}

/// Connect to the broker, declare the queue, and start consuming.
///
/// Called once at start-up; a failure here is fatal to the process.
/// Deliveries are auto-acknowledged at receipt, so a crash between
/// receipt and enqueue loses that one message.
pub async fn start(amqp_url: &str) -> Result<QueueConsumer, lapin::Error> {
    info!("Connecting to RabbitMQ...");
    let conn = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
    info!("Successfully connected to RabbitMQ");

    let channel = conn.create_channel().await?;
    channel
        .queue_declare(
            TASK_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    info!("Queue '{}' declared successfully", TASK_QUEUE);

    let consumer = channel
        .basic_consume(
            TASK_QUEUE,
            "",
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    info!("Started consuming messages from {}", TASK_QUEUE);

    Ok(QueueConsumer {
        _conn: conn,
        consumer,
    })
}

impl QueueConsumer {
    /// Consume queue messages until the delivery stream or the broadcast
    /// channel ends.
    ///
    /// Per message: parse the envelope, re-fetch the task's projection,
    /// and enqueue the enriched event. Malformed envelopes and vanished
    /// tasks are logged and dropped; an enriched event is never dropped -
    /// the send blocks until the fan-out side has room.
    pub async fn run(mut self, db: Arc<DbTasks>, broadcast: mpsc::Sender<TaskEvent>) {
        while let Some(delivery) = self.consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!("Broker delivery error: {}", e);
                    continue;
                }
            };

            let envelope = match parse_envelope(&delivery.data) {
                Ok(envelope) => envelope,
                Err(e) => {
                    error!("Dropping malformed queue envelope: {}", e);
                    continue;
                }
            };

            info!(
                "Processing queue message - task: {}, action: {}",
                envelope.task_id, envelope.action
            );

            // The notification can arrive before the writing transaction
            // has committed; give the store a moment before re-reading.
            tokio::time::sleep(Duration::from_millis(200)).await;

            let (task_data, _scope) = match db.task_details(envelope.task_id).await {
                Ok(Some(details)) => details,
                Ok(None) => {
                    warn!("Task {} vanished before broadcast, dropping", envelope.task_id);
                    continue;
                }
                Err(e) => {
                    error!("Failed to fetch task {}: {}", envelope.task_id, e);
                    continue;
                }
            };

            let event = TaskEvent {
                action: envelope.action,
                task_id: envelope.task_id,
                task_data,
            };

            if broadcast.send(event).await.is_err() {
                error!("Broadcast channel closed, stopping consumer");
                return;
            }
        }
        warn!("Broker delivery stream ended, consumer exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_envelope_parses() {
        let envelope =
            parse_envelope(br#"{"task_id":"70a8459b-5a5f-45e9-b40b-5a62e3936318","action":"task_started"}"#)
                .unwrap();
        assert_eq!(
            envelope,
            TaskEnvelope {
                task_id: Uuid::parse_str("70a8459b-5a5f-45e9-b40b-5a62e3936318").unwrap(),
                action: "task_started".to_string(),
            }
        );
    }

    #[test]
    fn non_uuid_task_id_is_rejected() {
        let err = parse_envelope(br#"{"task_id":"not-a-uuid","action":"x"}"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidTaskId(_)));
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(matches!(
            parse_envelope(br#"{"action":"x"}"#).unwrap_err(),
            EnvelopeError::Json(_)
        ));
        assert!(matches!(
            parse_envelope(br#"{"task_id":"70a8459b-5a5f-45e9-b40b-5a62e3936318"}"#).unwrap_err(),
            EnvelopeError::Json(_)
        ));
    }

    #[test]
    fn empty_action_is_rejected() {
        let err = parse_envelope(br#"{"task_id":"70a8459b-5a5f-45e9-b40b-5a62e3936318","action":""}"#)
            .unwrap_err();
        assert!(matches!(err, EnvelopeError::EmptyAction));
    }

    #[test]
    fn non_json_body_is_rejected() {
        assert!(matches!(
            parse_envelope(b"definitely not json").unwrap_err(),
            EnvelopeError::Json(_)
        ));
    }
}
