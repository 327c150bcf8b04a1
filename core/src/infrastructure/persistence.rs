// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Optional SQLite persistence.
//!
//! The runtime is correct fully in-memory; when a `db` section is
//! configured, tasks, execution records, and the agent roster are written
//! through here. Writes are best-effort and never sit on the dispatch path.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::domain::agent::ExecutionRecord;
use crate::domain::config::AgentConfig;
use crate::domain::task::Task;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) `<stem>.db` in the working directory.
    pub async fn open(stem: &str) -> Result<Self, StoreError> {
        Self::connect(&format!("sqlite:{stem}.db?mode=rwc"), 4).await
    }

    /// In-memory database, used by tests. Single connection: every sqlite
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id     TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT NOT NULL,
                assigned_to TEXT NOT NULL,
                assigned_by TEXT NOT NULL,
                status      TEXT NOT NULL,
                priority    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                metadata    TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                execution_id  TEXT PRIMARY KEY,
                task_id       TEXT NOT NULL,
                agent_name    TEXT NOT NULL,
                action        TEXT NOT NULL,
                status        TEXT NOT NULL,
                duration_ms   INTEGER NOT NULL,
                error_message TEXT,
                timestamp     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                agent_name  TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                model       TEXT NOT NULL,
                hierarchy   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&task.metadata)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tasks
                (task_id, title, description, assigned_to, assigned_by, status, priority, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.assigned_to)
        .bind(&task.assigned_by)
        .bind(task.status.to_string())
        .bind(task.priority.to_string())
        .bind(task.created_at.to_rfc3339())
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_execution(
        &self,
        agent_name: &str,
        record: &ExecutionRecord,
    ) -> Result<(), StoreError> {
        let status = serde_json::to_value(record.status)?
            .as_str()
            .unwrap_or("processing")
            .to_string();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO executions
                (execution_id, task_id, agent_name, action, status, duration_ms, error_message, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.execution_id)
        .bind(&record.task_id)
        .bind(agent_name)
        .bind(&record.action)
        .bind(status)
        .bind(record.duration.as_millis() as i64)
        .bind(&record.error_message)
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn save_agent(&self, config: &AgentConfig) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO agents (agent_name, description, model, hierarchy)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&config.name)
        .bind(&config.desc)
        .bind(&config.model)
        .bind(config.hierarchy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn task_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn execution_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM executions")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}
