use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::cursor::ResponseCursor;
use super::types::{RespondentSpan, ResponseFilter, ResponseRow};
use crate::errors::{DbError, DomainError, DomainResult};

const SELECT_RESPONSES: &str = "SELECT r.parent_surveyid AS parent_surveyid,
        r.parent_shortcode AS parent_shortcode,
        r.surveyid AS surveyid,
        r.flowid AS flowid,
        r.userid AS userid,
        r.question_ref AS question_ref,
        r.question_idx AS question_idx,
        r.question_text AS question_text,
        r.response AS response,
        r.timestamp AS timestamp,
        r.metadata AS metadata,
        r.pageid AS pageid,
        r.translated_response AS translated_response
    FROM responses r";

/// Paged access to survey responses.
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    /// Up to `limit` rows matching `filter` strictly after `after`, in
    /// ascending keyset order. Fewer than `limit` rows means the end was reached.
    async fn fetch_page(
        &self,
        filter: &ResponseFilter,
        after: Option<&ResponseCursor>,
        limit: usize,
    ) -> DomainResult<Vec<ResponseRow>>;

    /// Each respondent's earliest and latest answer to the surveys owned by
    /// `email`, optionally only those called `survey_name`. Ordered by respondent.
    async fn first_and_last(
        &self,
        email: &str,
        survey_name: Option<&str>,
    ) -> DomainResult<Vec<RespondentSpan>>;
}

pub struct SqliteResponseRepository {
    pool: SqlitePool,
}

impl SqliteResponseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &ResponseFilter) -> bool {
    match filter {
        ResponseFilter::Survey { email, survey_name } => {
            query.push(
                " JOIN surveys s ON r.surveyid = s.id
                  JOIN users u ON s.userid = u.id
                  WHERE u.email = ",
            );
            query.push_bind(email.clone());
            query.push(" AND s.survey_name = ");
            query.push_bind(survey_name.clone());
            true
        }
        ResponseFilter::All => false,
    }
}

#[async_trait]
impl ResponseRepository for SqliteResponseRepository {
    async fn fetch_page(
        &self,
        filter: &ResponseFilter,
        after: Option<&ResponseCursor>,
        limit: usize,
    ) -> DomainResult<Vec<ResponseRow>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::new(SELECT_RESPONSES);
        let has_where = push_filter(&mut query, filter);

        if let Some(cursor) = after {
            query.push(if has_where { " AND " } else { " WHERE " });
            query.push("(r.userid, r.timestamp, r.question_ref, r.surveyid) > (");
            let mut keys = query.separated(", ");
            keys.push_bind(cursor.userid.clone());
            keys.push_bind(cursor.timestamp.clone());
            keys.push_bind(cursor.question_ref.clone());
            keys.push_bind(cursor.surveyid.clone());
            keys.push_unseparated(")");
        }

        query.push(" ORDER BY r.userid ASC, r.timestamp ASC, r.question_ref ASC, r.surveyid ASC LIMIT ");
        query.push_bind(limit as i64);

        let rows = query
            .build_query_as::<ResponseRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::Database(DbError::Query(format!("Failed to fetch responses: {}", e))))?;

        Ok(rows)
    }

    async fn first_and_last(
        &self,
        email: &str,
        survey_name: Option<&str>,
    ) -> DomainResult<Vec<RespondentSpan>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "WITH scoped AS (
                SELECT r.userid, r.surveyid, r.timestamp, r.response, r.question_ref
                FROM responses r
                JOIN surveys s ON r.surveyid = s.id
                JOIN users u ON s.userid = u.id
                WHERE u.email = ",
        );
        query.push_bind(email.to_string());
        if let Some(name) = survey_name {
            query.push(" AND s.survey_name = ");
            query.push_bind(name.to_string());
        }
        query.push(
            "), ranked AS (
                SELECT userid, surveyid, timestamp, response,
                    ROW_NUMBER() OVER (PARTITION BY userid
                        ORDER BY timestamp ASC, question_ref ASC, surveyid ASC) AS first_rank,
                    ROW_NUMBER() OVER (PARTITION BY userid
                        ORDER BY timestamp DESC, question_ref DESC, surveyid DESC) AS last_rank
                FROM scoped
            )
            SELECT f.userid AS userid,
                f.surveyid AS first_surveyid,
                f.timestamp AS first_timestamp,
                f.response AS first_response,
                l.surveyid AS last_surveyid,
                l.timestamp AS last_timestamp,
                l.response AS last_response
            FROM ranked f
            JOIN ranked l ON l.userid = f.userid AND l.last_rank = 1
            WHERE f.first_rank = 1
            ORDER BY f.userid",
        );

        query
            .build_query_as::<RespondentSpan>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                DomainError::Database(DbError::Query(format!(
                    "Failed to fetch first and last responses: {}",
                    e
                )))
            })
    }
}
