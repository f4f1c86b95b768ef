//! PostgreSQL persistence for the ICR pipeline
//!
//! Scans and stitched labels are stored as JSONB documents next to the
//! columns that carry their unique keys, status and creation time.

pub mod collection;
pub mod scan;
pub mod stitched;

use icr_core::RepositoryError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

pub use collection::PgGradedCardSink;
pub use scan::PgScanRepository;
pub use stitched::PgStitchedLabelRepository;

/// Errors raised while opening the database.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Open a connection pool and apply pending migrations.
pub async fn connect(database_url: &str, config: &Config) -> Result<PgPool, DatabaseError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(
        max_connections = config.database_max_connections,
        "Database connected and migrations applied"
    );

    Ok(pool)
}

/// Map a query error, turning unique-key violations into
/// [`RepositoryError::Duplicate`].
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Duplicate(
            db.constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db.message().to_string()),
        ),
        _ => RepositoryError::Backend(err.to_string()),
    }
}

/// `LIMIT`/`OFFSET` pair for a page request.
pub(crate) fn limit_offset(pagination: icr_core::Pagination) -> (i64, i64) {
    (
        i64::from(pagination.limit),
        i64::try_from(pagination.offset()).unwrap_or(i64::MAX),
    )
}
