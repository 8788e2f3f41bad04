use sqlx::SqlitePool;

use crate::errors::{DbError, DbResult};

// Embed all migration SQL files at compile time
const MIGRATION_BASIC: &str = include_str!("../migrations/20250101000000_basic.sql");
const MIGRATION_EXPORT_STATUS: &str = include_str!("../migrations/20250102000000_export_status.sql");

// List of migrations with their names and SQL content
const MIGRATIONS: &[(&str, &str)] = &[
    ("20250101000000_basic.sql", MIGRATION_BASIC),
    ("20250102000000_export_status.sql", MIGRATION_EXPORT_STATUS),
];

/// Bring the schema up to date, applying every migration after the last
/// recorded one inside a single transaction.
pub async fn initialize_database(pool: &SqlitePool) -> DbResult<()> {
    log::debug!("Starting database migration process");

    create_migrations_table(pool).await?;

    let last_migration = get_last_migration(pool).await?;
    match &last_migration {
        Some(name) => log::debug!("Last applied migration: {}", name),
        None => log::debug!("No migrations applied yet"),
    }

    apply_pending_migrations(pool, last_migration).await?;

    log::debug!("Database migration process completed");
    Ok(())
}

async fn create_migrations_table(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| DbError::Migration(format!("Failed to create migrations table: {}", e)))?;

    Ok(())
}

async fn get_last_migration(pool: &SqlitePool) -> DbResult<Option<String>> {
    sqlx::query_scalar::<_, String>("SELECT name FROM migrations ORDER BY id DESC LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| DbError::Migration(format!("Failed to get last migration: {}", e)))
}

async fn apply_pending_migrations(pool: &SqlitePool, last_migration: Option<String>) -> DbResult<()> {
    let pending_migrations = get_pending_migrations(last_migration.as_deref());

    if pending_migrations.is_empty() {
        log::debug!("No pending migrations to apply");
        return Ok(());
    }

    log::info!("Applying {} pending migrations", pending_migrations.len());

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to begin transaction: {}", e)))?;

    for (migration_name, migration_sql) in pending_migrations {
        log::debug!("Applying migration: {}", migration_name);

        sqlx::raw_sql(migration_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("Failed to apply migration {}: {}", migration_name, e)))?;

        sqlx::query("INSERT INTO migrations (name, applied_at) VALUES (?, ?)")
            .bind(migration_name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("Failed to record migration {}: {}", migration_name, e)))?;
    }

    tx.commit()
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to commit migrations: {}", e)))?;

    log::info!("All migrations applied and committed");
    Ok(())
}

/// Migrations that come after `last_migration`, in declaration order.
fn get_pending_migrations(last_migration: Option<&str>) -> Vec<(&'static str, &'static str)> {
    let mut pending = Vec::new();
    let mut should_include = last_migration.is_none();

    for &(migration_name, migration_sql) in MIGRATIONS {
        if should_include {
            pending.push((migration_name, migration_sql));
        } else if Some(migration_name) == last_migration {
            should_include = true;
        }
    }

    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_migrations_after_last() {
        assert_eq!(get_pending_migrations(None).len(), MIGRATIONS.len());

        let pending = get_pending_migrations(Some("20250101000000_basic.sql"));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "20250102000000_export_status.sql");

        assert!(get_pending_migrations(Some("20250102000000_export_status.sql")).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let db = crate::database::Database::in_memory().await.unwrap();
        initialize_database(db.pool()).await.unwrap();

        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
