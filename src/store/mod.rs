//! Persistence layer: PostgreSQL store, schema and migrations.

pub mod database;
pub mod migrations;
pub mod schema;

pub use database::{EssayStore, StatusReport, StoreError};
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
