use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Read-only projection of a task at a point in time.
///
/// Always rebuilt fresh from the store for every broadcast and every
/// initial snapshot; a cached copy could show a manager stale state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "duration_nanos")]
    pub total_duration: Duration,
    pub in_progress: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub developer_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    pub is_started: bool,
    pub is_paused: bool,
    pub is_stopped: bool,
    /// Present only while the task is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
}

/// Owning scope of a task, as resolved by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskScope {
    pub team_id: Uuid,
    pub sprint_id: Option<Uuid>,
    pub manager_id: Uuid,
}

/// Durations cross the wire as integer nanoseconds.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.as_nanos() as i64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            id: Uuid::new_v4(),
            name: "Implement login".to_string(),
            total_duration: Duration::from_secs(90),
            in_progress: true,
            developer_name: String::new(),
            status: String::new(),
            is_started: true,
            is_paused: false,
            is_stopped: false,
            start_time: None,
            update_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn duration_serializes_as_nanoseconds() {
        let json = serde_json::to_value(snapshot()).unwrap();
        assert_eq!(json["total_duration"], serde_json::json!(90_000_000_000i64));
    }

    #[test]
    fn empty_optional_fields_are_omitted() {
        let json = serde_json::to_value(snapshot()).unwrap();
        let fields = json.as_object().unwrap();
        assert!(!fields.contains_key("developer_name"));
        assert!(!fields.contains_key("status"));
        assert!(!fields.contains_key("start_time"));
    }

    #[test]
    fn populated_optional_fields_are_present() {
        let mut task = snapshot();
        task.developer_name = "Alice".to_string();
        task.status = "started".to_string();
        task.start_time = Some(task.update_time);

        let json = serde_json::to_value(task).unwrap();
        assert_eq!(json["developer_name"], "Alice");
        assert_eq!(json["status"], "started");
        assert!(json["start_time"].is_string());
    }

    #[test]
    fn snapshot_round_trips() {
        let task = snapshot();
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.total_duration, task.total_duration);
        assert_eq!(back.update_time, task.update_time);
    }
}
