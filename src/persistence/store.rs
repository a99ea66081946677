//! SQLite-based run recorder

use crate::core::{
    PipelineId, PipelineRun, Preview, RunId, RunLogLine, RunStatus, StepResult, StepStatus,
    StepTransition,
};
use crate::persistence::RunRecorder;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run recorder
///
/// `step_results` holds the current state of every step; `step_transitions`
/// is the append-only history of status changes.
pub struct SqliteRunRecorder {
    pool: SqlitePool,
}

impl SqliteRunRecorder {
    /// Open (creating if needed) a database file
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database {}", db_path.display()))?;

        let recorder = Self { pool };
        recorder.init().await?;
        Ok(recorder)
    }

    /// Private in-memory database (single connection so every query sees it)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let recorder = Self { pool };
        recorder.init().await?;
        Ok(recorder)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id TEXT PRIMARY KEY,
                pipeline_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE TABLE IF NOT EXISTS step_results (
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id),
                step_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                payload TEXT,
                error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (run_id, step_order)
            );

            CREATE TABLE IF NOT EXISTS step_transitions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id),
                step_order INTEGER NOT NULL,
                status TEXT NOT NULL,
                at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES pipeline_runs(id),
                at TEXT NOT NULL,
                message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs(pipeline_id);
            CREATE INDEX IF NOT EXISTS idx_transitions_run ON step_transitions(run_id);
            CREATE INDEX IF NOT EXISTS idx_logs_run ON run_logs(run_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    async fn run_status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        let row = sqlx::query("SELECT status FROM pipeline_runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read run status")?;

        row.map(|r| parse_status::<RunStatus>(&r.get::<String, _>("status")))
            .transpose()
    }

    async fn ensure_running(&self, run_id: RunId) -> Result<()> {
        match self.run_status(run_id).await? {
            None => bail!("Unknown run {}", run_id),
            Some(RunStatus::Running) => Ok(()),
            Some(status) => bail!("Run {} is already {}", run_id, status),
        }
    }

    fn step_from_row(row: &SqliteRow) -> Result<StepResult> {
        let payload = row
            .get::<Option<String>, _>("payload")
            .map(|raw| serde_json::from_str::<Preview>(&raw))
            .transpose()
            .context("Corrupt step payload")?;

        Ok(StepResult {
            order: row.get::<i64, _>("step_order") as u32,
            status: parse_status(&row.get::<String, _>("status"))?,
            payload,
            error: row.get("error"),
            updated_at: Self::from_naive(row.get("updated_at")),
        })
    }
}

fn parse_status<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|e| anyhow!(e))
}

#[async_trait::async_trait]
impl RunRecorder for SqliteRunRecorder {
    async fn create_run(&self, pipeline_id: PipelineId, orders: &[u32]) -> Result<RunId> {
        let run = PipelineRun::start(pipeline_id, orders);
        let started_at = Self::to_naive(run.started_at);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_id, status, started_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(run.id.to_string())
        .bind(pipeline_id)
        .bind(run.status.as_str())
        .bind(started_at)
        .execute(&mut *tx)
        .await
        .context("Failed to create run")?;

        for step in &run.steps {
            sqlx::query(
                r#"
                INSERT INTO step_results (run_id, step_order, status, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(run.id.to_string())
            .bind(step.order as i64)
            .bind(StepStatus::Pending.as_str())
            .bind(started_at)
            .execute(&mut *tx)
            .await
            .context("Failed to create step result")?;

            sqlx::query(
                r#"
                INSERT INTO step_transitions (run_id, step_order, status, at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(run.id.to_string())
            .bind(step.order as i64)
            .bind(StepStatus::Pending.as_str())
            .bind(started_at)
            .execute(&mut *tx)
            .await
            .context("Failed to record step transition")?;
        }

        tx.commit().await.context("Failed to commit new run")?;
        Ok(run.id)
    }

    async fn update_step_status(
        &self,
        run_id: RunId,
        order: u32,
        status: StepStatus,
        payload: Option<&Preview>,
        error: Option<&str>,
    ) -> Result<()> {
        self.ensure_running(run_id).await?;

        let payload = payload.map(serde_json::to_string).transpose()?;
        let now = Self::to_naive(Utc::now());
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE step_results
            SET status = ?1,
                payload = COALESCE(?2, payload),
                error = COALESCE(?3, error),
                updated_at = ?4
            WHERE run_id = ?5 AND step_order = ?6
            "#,
        )
        .bind(status.as_str())
        .bind(payload)
        .bind(error)
        .bind(now)
        .bind(run_id.to_string())
        .bind(order as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to update step status")?;

        if updated.rows_affected() == 0 {
            bail!("Run {} has no step {}", run_id, order);
        }

        sqlx::query(
            r#"
            INSERT INTO step_transitions (run_id, step_order, status, at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(run_id.to_string())
        .bind(order as i64)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to record step transition")?;

        tx.commit().await.context("Failed to commit step status")?;
        Ok(())
    }

    async fn finalize_run(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            bail!("Cannot finalize run {} as {}", run_id, status);
        }

        let updated = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = ?1, finished_at = ?2
            WHERE id = ?3 AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(Self::to_naive(Utc::now()))
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to finalize run")?;

        if updated.rows_affected() == 0 {
            // Distinguish unknown runs from runs already finalized
            self.ensure_running(run_id).await?;
            bail!("Run {} could not be finalized", run_id);
        }
        Ok(())
    }

    async fn append_log(&self, run_id: RunId, message: &str) -> Result<()> {
        if self.run_status(run_id).await?.is_none() {
            bail!("Unknown run {}", run_id);
        }

        sqlx::query("INSERT INTO run_logs (run_id, at, message) VALUES (?1, ?2, ?3)")
            .bind(run_id.to_string())
            .bind(Self::to_naive(Utc::now()))
            .bind(message)
            .execute(&self.pool)
            .await
            .context("Failed to append run log")?;

        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(
            r#"
            SELECT id, pipeline_id, status, started_at, finished_at
            FROM pipeline_runs
            WHERE id = ?1
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load run")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let steps = sqlx::query(
            r#"
            SELECT step_order, status, payload, error, updated_at
            FROM step_results
            WHERE run_id = ?1
            ORDER BY step_order ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load step results")?
        .iter()
        .map(Self::step_from_row)
        .collect::<Result<Vec<_>>>()?;

        let logs = sqlx::query(
            r#"
            SELECT at, message
            FROM run_logs
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load run logs")?
        .iter()
        .map(|r| RunLogLine {
            at: Self::from_naive(r.get("at")),
            message: r.get("message"),
        })
        .collect();

        Ok(Some(PipelineRun {
            id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline_id: row.get("pipeline_id"),
            status: parse_status(&row.get::<String, _>("status"))?,
            started_at: Self::from_naive(row.get("started_at")),
            finished_at: row
                .get::<Option<NaiveDateTime>, _>("finished_at")
                .map(Self::from_naive),
            steps,
            logs,
        }))
    }

    async fn list_runs(&self, pipeline_id: PipelineId) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM pipeline_runs
            WHERE pipeline_id = ?1
            ORDER BY rowid DESC
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let run_id = Uuid::parse_str(&row.get::<String, _>("id"))?;
            if let Some(run) = self.load_run(run_id).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineId>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_id
            FROM pipeline_runs
            ORDER BY pipeline_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_id")).collect())
    }

    async fn step_transitions(&self, run_id: RunId) -> Result<Vec<StepTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT step_order, status, at
            FROM step_transitions
            WHERE run_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load step transitions")?;

        rows.iter()
            .map(|row| {
                Ok(StepTransition {
                    order: row.get::<i64, _>("step_order") as u32,
                    status: parse_status(&row.get::<String, _>("status"))?,
                    at: Self::from_naive(row.get("at")),
                })
            })
            .collect()
    }
}
