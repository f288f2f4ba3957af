use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::interval::parse_interval;
use crate::models::{TaskScope, TaskSnapshot};
use crate::ws::fanout::OwnershipResolver;

/// Database connection pool for the task store.
///
/// The gateway only reads: every query below is one of the store's
/// reporting procedures.
pub struct DbTasks {
    pool: PgPool,
}

impl DbTasks {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    ///
    /// # Returns
    /// * `Result<Self, SqlxError>` - Database connection pool or error
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Resolve a manager's owning team and latest sprint.
    ///
    /// # Arguments
    /// * `manager_id` - The manager's identity from the validated token
    ///
    /// # Returns
    /// * `Result<(Uuid, Option<Uuid>), SqlxError>` - Team id and sprint id;
    ///   the sprint is `None` when the manager's team has no assigned sprint
    pub async fn manager_team_and_sprint(
        &self,
        manager_id: Uuid,
    ) -> Result<(Uuid, Option<Uuid>), SqlxError> {
        let row = sqlx::query("SELECT * FROM GetManagerTeamAndSprint($1)")
            .bind(manager_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => {
                warn!("No team found for manager {}", manager_id);
                return Err(SqlxError::RowNotFound);
            }
        };

        let team_id: Uuid = row.try_get(0)?;
        let sprint_id: Option<Uuid> = row.try_get(1)?;
        if sprint_id.is_none() {
            warn!("No sprint found for manager's team {}", team_id);
        }

        info!(
            "Found team {}, sprint {:?} for manager {}",
            team_id, sprint_id, manager_id
        );
        Ok((team_id, sprint_id))
    }

    /// List the current task projections for everything in a manager's scope.
    ///
    /// Rows that fail to decode are skipped with a log line rather than
    /// failing the whole snapshot.
    pub async fn manager_tasks(&self, manager_id: Uuid) -> Result<Vec<TaskSnapshot>, SqlxError> {
        info!("Getting tasks for manager {}", manager_id);

        let rows = sqlx::query("SELECT * FROM GetManagerTasksWithDetails($1)")
            .bind(manager_id)
            .fetch_all(&self.pool)
            .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            match snapshot_from_row(row) {
                Ok(task) => tasks.push(task),
                Err(e) => error!("Failed to decode task row: {}", e),
            }
        }

        info!("Retrieved {} tasks for manager {}", tasks.len(), manager_id);
        Ok(tasks)
    }

    /// Fetch one task projection and its owning scope by id.
    ///
    /// Returns `None` when the task no longer exists.
    pub async fn task_details(
        &self,
        task_id: Uuid,
    ) -> Result<Option<(TaskSnapshot, TaskScope)>, SqlxError> {
        let row = sqlx::query("SELECT * FROM GetSingleTaskDetails($1)")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => {
                warn!("Task {} not found", task_id);
                return Ok(None);
            }
        };

        let task = snapshot_from_row(&row)?;
        let scope = TaskScope {
            sprint_id: row.try_get(10)?,
            team_id: row.try_get(11)?,
            manager_id: row.try_get(12)?,
        };
        Ok(Some((task, scope)))
    }
}

#[async_trait]
impl OwnershipResolver for DbTasks {
    async fn task_scope(&self, task_id: Uuid) -> Result<Option<TaskScope>, SqlxError> {
        Ok(self.task_details(task_id).await?.map(|(_, scope)| scope))
    }
}

/// Decode the projection columns shared by the task procedures.
///
/// Column order: id, name, total_duration (text), is_started, is_paused,
/// is_stopped, status, developer_name, start_time, update_time.
fn snapshot_from_row(row: &PgRow) -> Result<TaskSnapshot, SqlxError> {
    let id: Uuid = row.try_get(0)?;
    let name: String = row.try_get(1)?;
    let duration_text: String = row.try_get(2)?;
    let is_started: bool = row.try_get(3)?;
    let is_paused: bool = row.try_get(4)?;
    let is_stopped: bool = row.try_get(5)?;
    let status: Option<String> = row.try_get(6)?;
    let developer_name: Option<String> = row.try_get(7)?;
    let start_time: Option<DateTime<Utc>> = row.try_get(8)?;
    let update_time: DateTime<Utc> = row.try_get(9)?;

    Ok(TaskSnapshot {
        id,
        name,
        total_duration: parse_interval(&duration_text),
        in_progress: is_started,
        developer_name: developer_name.unwrap_or_default(),
        status: status.unwrap_or_default(),
        is_started,
        is_paused,
        is_stopped,
        start_time,
        update_time,
    })
}
