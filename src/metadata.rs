// src/metadata.rs
// Relational metadata: functions, run logs, pipelines, cron jobs, projects and topic bindings

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::types::{
    CronJob, Function, OutputKind, Pipeline, Project, RunLog, ScheduleHandle, SortDirection,
    TopicBinding,
};

#[derive(Clone)]
pub struct MetaStore {
    db: Arc<Database>,
}

fn parse_uuid(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Ok(Uuid::parse_str(&raw)?)
}

fn parse_opt_uuid(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    Ok(raw.map(|s| Uuid::parse_str(&s)).transpose()?)
}

fn function_from_row(row: &SqliteRow) -> Result<Function> {
    Ok(Function {
        id: parse_uuid(row, "id")?,
        project_id: parse_opt_uuid(row, "project_id")?,
        title: row.try_get("title")?,
        image: row.try_get("image")?,
        params: row.try_get("params")?,
        env: row.try_get("env")?,
        container_id: row.try_get("container_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_log_from_row(row: &SqliteRow) -> Result<RunLog> {
    Ok(RunLog {
        id: parse_uuid(row, "id")?,
        function_id: parse_uuid(row, "function_id")?,
        run_at: row.try_get("run_at")?,
        result: row.try_get("result")?,
    })
}

fn pipeline_from_row(row: &SqliteRow) -> Result<Pipeline> {
    let input_kind: String = row.try_get("input_kind")?;
    Ok(Pipeline {
        id: parse_uuid(row, "id")?,
        title: row.try_get("title")?,
        input_kind: input_kind.parse()?,
        input_id: parse_uuid(row, "input_id")?,
        output_kind: OutputKind(row.try_get("output_kind")?),
        output_id: parse_uuid(row, "output_id")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<CronJob> {
    let handle: Option<i64> = row.try_get("schedule_handle")?;
    Ok(CronJob {
        id: parse_uuid(row, "id")?,
        title: row.try_get("title")?,
        schedule: row.try_get("schedule")?,
        function_id: parse_uuid(row, "function_id")?,
        schedule_handle: handle.map(ScheduleHandle),
    })
}

fn project_from_row(row: &SqliteRow) -> Result<Project> {
    Ok(Project {
        id: parse_uuid(row, "id")?,
        title: row.try_get("title")?,
        key: row.try_get("key")?,
        origins: row.try_get("origins")?,
    })
}

fn binding_from_row(row: &SqliteRow) -> Result<TopicBinding> {
    Ok(TopicBinding {
        id: parse_uuid(row, "id")?,
        project_id: parse_uuid(row, "project_id")?,
        collection: row.try_get("collection")?,
    })
}

const FUNCTION_COLUMNS: &str =
    "id, project_id, title, image, params, env, container_id, created_at, updated_at";

impl MetaStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.db.pool().await
    }

    // ── Functions

    pub async fn create_function(&self, function: &Function) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO functions
                (id, project_id, title, image, params, env, container_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(function.id.to_string())
        .bind(function.project_id.map(|p| p.to_string()))
        .bind(&function.title)
        .bind(&function.image)
        .bind(&function.params)
        .bind(&function.env)
        .bind(&function.container_id)
        .bind(function.created_at)
        .bind(function.updated_at)
        .execute(self.pool().await?)
        .await?;

        Ok(())
    }

    /// Live (not soft-deleted) function by id
    pub async fn get_function(&self, id: Uuid) -> Result<Option<Function>> {
        let sql = format!(
            "SELECT {} FROM functions WHERE id = ? AND deleted_at IS NULL",
            FUNCTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool().await?)
            .await?;

        row.as_ref().map(function_from_row).transpose()
    }

    pub async fn list_functions(&self, limit: i64, offset: i64) -> Result<Vec<Function>> {
        let sql = format!(
            "SELECT {} FROM functions WHERE deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            FUNCTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool().await?)
            .await?;

        rows.iter().map(function_from_row).collect()
    }

    /// Persist edits; a changed image, params or env unbinds the container
    pub async fn update_function(&self, function: &Function) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE functions
            SET container_id = CASE
                    WHEN image = ? AND params = ? AND env = ? THEN container_id
                    ELSE NULL
                END,
                project_id = ?, title = ?, image = ?, params = ?, env = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&function.image)
        .bind(&function.params)
        .bind(&function.env)
        .bind(function.project_id.map(|p| p.to_string()))
        .bind(&function.title)
        .bind(&function.image)
        .bind(&function.params)
        .bind(&function.env)
        .bind(Utc::now())
        .bind(function.id.to_string())
        .execute(self.pool().await?)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_container_id(&self, function_id: Uuid, container_id: &str) -> Result<()> {
        sqlx::query("UPDATE functions SET container_id = ?, updated_at = ? WHERE id = ?")
            .bind(container_id)
            .bind(Utc::now())
            .bind(function_id.to_string())
            .execute(self.pool().await?)
            .await?;

        Ok(())
    }

    pub async fn delete_function(&self, id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("UPDATE functions SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(Utc::now())
                .bind(id.to_string())
                .execute(self.pool().await?)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    // ── Run logs

    pub async fn insert_run_log(&self, log: &RunLog) -> Result<()> {
        sqlx::query("INSERT INTO run_logs (id, function_id, run_at, result) VALUES (?, ?, ?, ?)")
            .bind(log.id.to_string())
            .bind(log.function_id.to_string())
            .bind(log.run_at)
            .bind(&log.result)
            .execute(self.pool().await?)
            .await?;

        Ok(())
    }

    pub async fn get_run_log(&self, function_id: Uuid, run_id: Uuid) -> Result<Option<RunLog>> {
        let row = sqlx::query(
            "SELECT id, function_id, run_at, result FROM run_logs WHERE id = ? AND function_id = ?",
        )
        .bind(run_id.to_string())
        .bind(function_id.to_string())
        .fetch_optional(self.pool().await?)
        .await?;

        row.as_ref().map(run_log_from_row).transpose()
    }

    pub async fn list_run_logs(
        &self,
        function_id: Uuid,
        limit: i64,
        offset: i64,
        direction: SortDirection,
    ) -> Result<Vec<RunLog>> {
        let sql = format!(
            "SELECT id, function_id, run_at, result FROM run_logs WHERE function_id = ? \
             ORDER BY run_at {dir}, rowid {dir} LIMIT ? OFFSET ?",
            dir = direction.as_sql()
        );
        let rows = sqlx::query(&sql)
            .bind(function_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool().await?)
            .await?;

        rows.iter().map(run_log_from_row).collect()
    }

    /// Total runs of a function; this is its derived run counter
    pub async fn count_run_logs(&self, function_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM run_logs WHERE function_id = ?")
            .bind(function_id.to_string())
            .fetch_one(self.pool().await?)
            .await?;

        Ok(count)
    }

    // ── Pipelines

    pub async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipelines (id, title, input_kind, input_id, output_kind, output_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(pipeline.id.to_string())
        .bind(&pipeline.title)
        .bind(pipeline.input_kind.as_str())
        .bind(pipeline.input_id.to_string())
        .bind(pipeline.output_kind.as_str())
        .bind(pipeline.output_id.to_string())
        .bind(Utc::now())
        .execute(self.pool().await?)
        .await?;

        Ok(())
    }

    /// First pipeline (by insertion order) whose input matches
    pub async fn find_pipeline(&self, input_kind: &str, input_id: Uuid) -> Result<Option<Pipeline>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, input_kind, input_id, output_kind, output_id
            FROM pipelines
            WHERE input_kind = ? AND input_id = ?
            ORDER BY seq ASC
            LIMIT 1
            "#,
        )
        .bind(input_kind)
        .bind(input_id.to_string())
        .fetch_optional(self.pool().await?)
        .await?;

        row.as_ref().map(pipeline_from_row).transpose()
    }

    pub async fn delete_pipeline(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool().await?)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ── Cron jobs

    pub async fn create_job(&self, job: &CronJob) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO cron_jobs (id, title, schedule, function_id, schedule_handle, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.title)
        .bind(&job.schedule)
        .bind(job.function_id.to_string())
        .bind(job.schedule_handle.map(|h| h.0))
        .bind(now)
        .bind(now)
        .execute(self.pool().await?)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<CronJob>> {
        let row = sqlx::query(
            "SELECT id, title, schedule, function_id, schedule_handle FROM cron_jobs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool().await?)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    /// One page of jobs in stable id order
    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<CronJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, schedule, function_id, schedule_handle
            FROM cron_jobs
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool().await?)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Overwrite schedule and title; the handle is managed separately
    pub async fn update_job(&self, job: &CronJob) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cron_jobs SET title = ?, schedule = ?, function_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&job.title)
        .bind(&job.schedule)
        .bind(job.function_id.to_string())
        .bind(Utc::now())
        .bind(job.id.to_string())
        .execute(self.pool().await?)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_schedule_handle(&self, job_id: Uuid, handle: Option<ScheduleHandle>) -> Result<()> {
        sqlx::query("UPDATE cron_jobs SET schedule_handle = ?, updated_at = ? WHERE id = ?")
            .bind(handle.map(|h| h.0))
            .bind(Utc::now())
            .bind(job_id.to_string())
            .execute(self.pool().await?)
            .await?;

        Ok(())
    }

    pub async fn delete_job(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cron_jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool().await?)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ── Projects and topic bindings

    pub async fn create_project(&self, project: &Project) -> Result<()> {
        sqlx::query("INSERT INTO projects (id, title, key, origins, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(project.id.to_string())
            .bind(&project.title)
            .bind(&project.key)
            .bind(&project.origins)
            .bind(Utc::now())
            .execute(self.pool().await?)
            .await?;

        Ok(())
    }

    pub async fn create_binding(&self, binding: &TopicBinding) -> Result<()> {
        sqlx::query(
            "INSERT INTO topic_bindings (id, project_id, collection, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(binding.id.to_string())
        .bind(binding.project_id.to_string())
        .bind(&binding.collection)
        .bind(Utc::now())
        .execute(self.pool().await?)
        .await?;

        Ok(())
    }

    pub async fn get_binding(&self, id: Uuid) -> Result<Option<TopicBinding>> {
        let row = sqlx::query("SELECT id, project_id, collection FROM topic_bindings WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool().await?)
            .await?;

        row.as_ref().map(binding_from_row).transpose()
    }

    /// Project owning a topic, through its earliest binding
    pub async fn project_for_collection(&self, collection: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.title, p.key, p.origins
            FROM topic_bindings b
            JOIN projects p ON p.id = b.project_id
            WHERE b.collection = ?
            ORDER BY b.created_at ASC
            LIMIT 1
            "#,
        )
        .bind(collection)
        .fetch_optional(self.pool().await?)
        .await?;

        row.as_ref().map(project_from_row).transpose()
    }
}
