//! # Database
//!
//! PostgreSQL connection pooling and schema migrations for the durable stores
//! in [`crate::store::postgres`].
//!
//! - [`connection`] - pool construction from [`crate::config::DatabaseConfig`]
//! - [`migrator`] - embedded `sqlx` migrations from `migrations/`

pub mod connection;
pub mod migrator;

pub use connection::DatabaseConnection;
pub use migrator::{run_migrations, MIGRATOR};
