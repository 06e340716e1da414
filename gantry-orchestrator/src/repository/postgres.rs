//! PostgreSQL store
//!
//! Workflows and runs are stored as JSONB documents. The columns next to the
//! document only exist for lookups and ordering.

use async_trait::async_trait;
use gantry_core::domain::run::{TransitionError, WorkflowRun};
use gantry_core::domain::workflow::Workflow;
use sqlx::PgPool;

use super::{Result, Store, StoreError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps a pool whose schema is already migrated
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a guarded write of `run` touched no row
    async fn rejected_write(&self, run: &WorkflowRun) -> Result<StoreError> {
        let stored: Option<(String, bool)> = sqlx::query_as(
            "SELECT workflow_name, completed_at IS NOT NULL FROM workflow_runs WHERE id = $1",
        )
        .bind(&run.id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match stored {
            None => StoreError::run_not_found(&run.id),
            Some((_, true)) => StoreError::RunFinished(run.id.clone()),
            Some((workflow_name, false)) => StoreError::Persistence(
                TransitionError::WorkflowMismatch {
                    run_id: run.id.clone(),
                    expected: workflow_name,
                    found: run.workflow_name.clone(),
                }
                .to_string(),
            ),
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO workflows (name, document, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (name) DO UPDATE
            SET document = EXCLUDED.document, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&workflow.name)
        .bind(serde_json::to_value(workflow)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_workflow(&self, name: &str) -> Result<Workflow> {
        let row = sqlx::query_as::<_, DocumentRow>("SELECT document FROM workflows WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::workflow_not_found(name))?;

        row.decode()
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, DocumentRow>("SELECT document FROM workflows ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DocumentRow::decode).collect()
    }

    async fn delete_workflow(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::workflow_not_found(name));
        }
        Ok(())
    }

    async fn save_run(&self, run: &WorkflowRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_runs (id, workflow_name, status, started_at, completed_at, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                document = EXCLUDED.document
            WHERE workflow_runs.completed_at IS NULL
              AND workflow_runs.workflow_name = EXCLUDED.workflow_name
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_name)
        .bind(run.status.to_string())
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(serde_json::to_value(run)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_write(run).await?);
        }

        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<WorkflowRun> {
        let row = sqlx::query_as::<_, DocumentRow>("SELECT document FROM workflow_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::run_not_found(id))?;

        row.decode()
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT document FROM workflow_runs ORDER BY started_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DocumentRow::decode).collect()
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, completed_at = $3, document = $4
            WHERE id = $1 AND completed_at IS NULL AND workflow_name = $5
            "#,
        )
        .bind(&run.id)
        .bind(run.status.to_string())
        .bind(run.completed_at)
        .bind(serde_json::to_value(run)?)
        .bind(&run.workflow_name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        Err(self.rejected_write(run).await?)
    }

    async fn delete_runs_by_workflow(&self, workflow_name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workflow_runs WHERE workflow_name = $1")
            .bind(workflow_name)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            "Deleted {} run(s) of workflow {}",
            result.rows_affected(),
            workflow_name
        );
        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document: serde_json::Value,
}

impl DocumentRow {
    fn decode<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.document)?)
    }
}
