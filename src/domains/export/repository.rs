use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::errors::{DbError, DomainError, DomainResult};

use super::types::{ExportJob, ExportStatus};

const SELECT_JOBS: &str = "SELECT export_id, survey_id, user_id, updated, status, export_link, file_name
     FROM export_status";

#[async_trait]
pub trait ExportJobRepository: Send + Sync {
    /// Inserts a new `pending` job.
    async fn create(&self, export_id: &str, user_id: &str, survey_id: &str) -> DomainResult<ExportJob>;
    /// Moves an unfinished job to `status`. Jobs already `done` or `error`
    /// are returned unchanged.
    async fn update_status(&self, export_id: &str, status: ExportStatus) -> DomainResult<ExportJob>;
    /// Finishes a job with the link and stored file of its export.
    async fn mark_done(&self, export_id: &str, export_link: &str, file_name: &str) -> DomainResult<ExportJob>;
    async fn find(&self, export_id: &str) -> DomainResult<ExportJob>;
    /// Most recently updated first.
    async fn list_for_user(&self, user_id: &str) -> DomainResult<Vec<ExportJob>>;
    /// Most recently updated first.
    async fn list_for_survey(&self, user_id: &str, survey_id: &str) -> DomainResult<Vec<ExportJob>>;
    /// Marks every `pending` or `processing` job as `error`. Returns how many
    /// were changed.
    async fn fail_unfinished(&self) -> DomainResult<u64>;
}

pub struct SqliteExportJobRepository {
    pool: SqlitePool,
}

impl SqliteExportJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(sqlx::FromRow)]
struct Row {
    export_id: String,
    survey_id: String,
    user_id: String,
    updated: String,
    status: String,
    export_link: Option<String>,
    file_name: Option<String>,
}

impl TryFrom<Row> for ExportJob {
    type Error = DomainError;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        let status = ExportStatus::parse(&row.status).ok_or_else(|| {
            DomainError::Internal(format!("Invalid status {} in export_status", row.status))
        })?;
        let updated = DateTime::parse_from_rfc3339(&row.updated)
            .map_err(|e| DomainError::Internal(format!("Bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(ExportJob {
            export_id: row.export_id,
            survey_id: row.survey_id,
            user_id: row.user_id,
            updated,
            status,
            export_link: row.export_link,
            file_name: row.file_name,
        })
    }
}

#[async_trait]
impl ExportJobRepository for SqliteExportJobRepository {
    async fn create(&self, export_id: &str, user_id: &str, survey_id: &str) -> DomainResult<ExportJob> {
        sqlx::query(
            "INSERT INTO export_status (export_id, survey_id, user_id, updated, status)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(export_id)
        .bind(survey_id)
        .bind(user_id)
        .bind(now())
        .bind(ExportStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        log::debug!("Export {} of {} for {} created", export_id, survey_id, user_id);
        self.find(export_id).await
    }

    async fn update_status(&self, export_id: &str, status: ExportStatus) -> DomainResult<ExportJob> {
        let result = sqlx::query(
            "UPDATE export_status SET updated = ?, status = ?
             WHERE export_id = ? AND status IN ('pending', 'processing')",
        )
        .bind(now())
        .bind(status.as_str())
        .bind(export_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        if result.rows_affected() == 0 {
            log::debug!("Export {} is finished or unknown, not moving it to {}", export_id, status.as_str());
        } else {
            log::debug!("Export {} is now {}", export_id, status.as_str());
        }
        self.find(export_id).await
    }

    async fn mark_done(&self, export_id: &str, export_link: &str, file_name: &str) -> DomainResult<ExportJob> {
        sqlx::query(
            "UPDATE export_status SET updated = ?, status = ?, export_link = ?, file_name = ?
             WHERE export_id = ?",
        )
        .bind(now())
        .bind(ExportStatus::Done.as_str())
        .bind(export_link)
        .bind(file_name)
        .bind(export_id)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        log::debug!("Export {} is now done", export_id);
        self.find(export_id).await
    }

    async fn find(&self, export_id: &str) -> DomainResult<ExportJob> {
        let row: Option<Row> = sqlx::query_as(&format!("{} WHERE export_id = ?", SELECT_JOBS))
            .bind(export_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::Database(e.into()))?;

        match row {
            Some(row) => row.try_into(),
            None => Err(DomainError::Database(DbError::NotFound(
                "export_status".to_string(),
                export_id.to_string(),
            ))),
        }
    }

    async fn list_for_user(&self, user_id: &str) -> DomainResult<Vec<ExportJob>> {
        let rows: Vec<Row> = sqlx::query_as(&format!(
            "{} WHERE user_id = ? ORDER BY updated DESC, export_id",
            SELECT_JOBS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        rows.into_iter().map(ExportJob::try_from).collect()
    }

    async fn list_for_survey(&self, user_id: &str, survey_id: &str) -> DomainResult<Vec<ExportJob>> {
        let rows: Vec<Row> = sqlx::query_as(&format!(
            "{} WHERE user_id = ? AND survey_id = ? ORDER BY updated DESC, export_id",
            SELECT_JOBS
        ))
        .bind(user_id)
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        rows.into_iter().map(ExportJob::try_from).collect()
    }

    async fn fail_unfinished(&self) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE export_status SET updated = ?, status = 'error'
             WHERE status IN ('pending', 'processing')",
        )
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Database(e.into()))?;

        Ok(result.rows_affected())
    }
}
