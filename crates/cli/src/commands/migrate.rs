//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! mercato migrate
//! ```
//!
//! # Environment Variables
//!
//! - `MERCATO_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Migrations live in `crates/api/migrations/` and are embedded at build time.

use secrecy::SecretString;
use thiserror::Error;

use mercato_api::store::create_pool;
use mercato_api::store::postgres::MIGRATOR;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run pending migrations.
///
/// # Errors
///
/// Returns `MigrationError` if the database URL is missing, the connection
/// fails, or a migration fails.
pub async fn run() -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("MERCATO_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map_err(|_| MigrationError::MissingEnvVar("MERCATO_DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&SecretString::from(database_url)).await?;

    tracing::info!(
        available = MIGRATOR.iter().count(),
        "Running migrations..."
    );
    MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
