//! Database layer for sensorlog.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations that create the event table.
//!
//! - **SQLite with WAL mode**: concurrent readers (the query API) alongside a
//!   single writer (the ingestion consumer).
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and parameterised by the configured table name.

mod migrations;
mod pool;

pub use migrations::{run_migrations, validate_table_name, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
