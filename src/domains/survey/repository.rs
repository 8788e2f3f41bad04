use async_trait::async_trait;
use sqlx::SqlitePool;

use super::types::SurveyFormData;
use crate::errors::{DbError, DomainError, DomainResult};

#[async_trait]
pub trait SurveyRepository: Send + Sync {
    /// Every version of `survey_name` owned by `email`, ordered by shortcode
    /// then creation time.
    async fn form_data(&self, email: &str, survey_name: &str) -> DomainResult<Vec<SurveyFormData>>;
}

pub struct SqliteSurveyRepository {
    pool: SqlitePool,
}

impl SqliteSurveyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SurveyRepository for SqliteSurveyRepository {
    async fn form_data(&self, email: &str, survey_name: &str) -> DomainResult<Vec<SurveyFormData>> {
        sqlx::query_as::<_, SurveyFormData>(
            r#"
            WITH t AS (
                SELECT s.*, row_number() OVER (PARTITION BY s.shortcode ORDER BY s.created) AS version
                FROM surveys s
                JOIN users u ON s.userid = u.id
                WHERE u.email = ?
                AND s.survey_name = ?
            )
            SELECT id AS surveyid,
                   shortcode,
                   survey_name,
                   version,
                   created AS survey_created,
                   metadata
            FROM t
            ORDER BY shortcode, created
            "#,
        )
        .bind(email)
        .bind(survey_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::Database(DbError::Query(format!("Failed to fetch form data: {}", e))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{seeded_db, OWNER_EMAIL, SURVEY_NAME};

    #[tokio::test]
    async fn test_versions_numbered_by_creation() {
        let db = seeded_db().await;
        let repo = SqliteSurveyRepository::new(db.pool().clone());

        let rows = repo.form_data(OWNER_EMAIL, SURVEY_NAME).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].surveyid, "survey-a");
        assert_eq!(rows[0].version, 1);
        assert_eq!(rows[1].surveyid, "survey-b");
        assert_eq!(rows[1].version, 2);

        assert!(repo.form_data("other@example.com", SURVEY_NAME).await.unwrap().is_empty());
    }
}
