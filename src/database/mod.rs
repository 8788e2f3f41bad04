use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::errors::{DbError, DbResult};

/// Owned handle to the connection pool.
///
/// Created once by the binary that needs it and released with [`Database::close`],
/// which consumes the handle. Repositories get their own pool clone through
/// [`Database::pool`]; the pool itself stays open until `close` runs.
#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect using the process configuration and bring the schema up to date.
    pub async fn connect(config: &AppConfig) -> DbResult<Self> {
        let db = Self::connect_url(&config.database_url, config.db_max_connections).await?;
        crate::db_migration::initialize_database(db.pool()).await?;
        Ok(db)
    }

    pub async fn connect_url(url: &str, max_connections: u32) -> DbResult<Self> {
        log::info!("Creating database connection pool (max_connections={})", max_connections);
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DbError::ConnectionPool(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                log::error!("Database connection failed: {}", e);
                DbError::ConnectionPool(format!("Database connection failed: {}", e))
            })?;

        log::info!("Database connection established");
        Ok(Self { pool })
    }

    /// Single-connection in-memory database with the schema applied.
    ///
    /// An in-memory SQLite database lives only as long as its connection, so the
    /// pool is pinned to one connection that never expires.
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::ConnectionPool(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        crate::db_migration::initialize_database(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every connection. Waits for checked-out connections to come back.
    pub async fn close(self) {
        log::info!("Closing database connection pool");
        self.pool.close().await;
        log::debug!("Database connection pool closed");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Database;
    use sqlx::SqlitePool;

    pub const OWNER_EMAIL: &str = "owner@example.com";
    pub const SURVEY_NAME: &str = "Baseline";

    /// Seeds one owner with two versions of `SURVEY_NAME` and an unrelated
    /// survey owned by somebody else.
    pub async fn seeded_db() -> Database {
        let db = Database::in_memory().await.expect("in-memory database");
        let pool = db.pool();

        for (id, email) in [("user-1", OWNER_EMAIL), ("user-2", "other@example.com")] {
            sqlx::query("INSERT INTO users (id, email) VALUES (?, ?)")
                .bind(id)
                .bind(email)
                .execute(pool)
                .await
                .unwrap();
        }

        for (id, owner, name, shortcode, created) in [
            ("survey-a", "user-1", SURVEY_NAME, "base", "2024-01-01T00:00:00Z"),
            ("survey-b", "user-1", SURVEY_NAME, "base", "2024-02-01T00:00:00Z"),
            ("survey-c", "user-2", "Other", "other", "2024-01-15T00:00:00Z"),
        ] {
            sqlx::query(
                "INSERT INTO surveys (id, userid, survey_name, shortcode, created, metadata) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(owner)
            .bind(name)
            .bind(shortcode)
            .bind(created)
            .bind(r#"{"off_time":60}"#)
            .execute(pool)
            .await
            .unwrap();
        }

        db
    }

    pub async fn insert_response(
        pool: &SqlitePool,
        surveyid: &str,
        userid: &str,
        question_ref: &str,
        timestamp: &str,
        response: Option<&str>,
    ) {
        sqlx::query(
            "INSERT INTO responses (parent_surveyid, parent_shortcode, surveyid, flowid, userid, question_ref, question_idx, question_text, response, timestamp, metadata, pageid, translated_response)
             VALUES (?, 'base', ?, 1, ?, ?, 1, 'What do you think?', ?, ?, NULL, 'page-1', NULL)",
        )
        .bind(surveyid)
        .bind(surveyid)
        .bind(userid)
        .bind(question_ref)
        .bind(response)
        .bind(timestamp)
        .execute(pool)
        .await
        .unwrap();
    }
}
