use sqlx::{
    SqlitePool,
    migrate::{MigrateError, Migrator},
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply the embedded SQL migrations. Already applied versions are skipped by sqlx's own table.
pub(super) async fn apply(pool: &SqlitePool) -> Result<Vec<String>, MigrateError> {
    MIGRATOR.run(pool).await?;
    Ok(MIGRATOR
        .iter()
        .map(|migration| format!("{}_{}", migration.version, migration.description))
        .collect())
}
