//! # Database Migration Support
//!
//! Migrations are embedded from the root `migrations/` directory using the
//! `YYYYMMDDHHMMSS_description.sql` naming convention.
//!
//! ```rust,ignore
//! #[sqlx::test(migrator = "enrichment_core::database::MIGRATOR")]
//! async fn test_something(pool: PgPool) { /* ... */ }
//! ```

use crate::error::GuardResult;
use sqlx::PgPool;
use tracing::info;

/// Every table owned by the governance layer
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply outstanding migrations; safe to run on every start-up
pub async fn run_migrations(pool: &PgPool) -> GuardResult<()> {
    info!("Running database migrations");
    MIGRATOR.run(pool).await?;
    info!("Database migrations complete");
    Ok(())
}
