//! Embedded SQL migration runner.
//!
//! Migrations are SQL templates embedded at compile time. The `{table}`
//! placeholder is replaced with the configured event table name, so the
//! same binary can write to differently named tables. Applied migrations are
//! tracked per table in `_sensorlog_migrations`; each runs exactly once.

use rusqlite::Connection;
use thiserror::Error;

/// A single embedded migration.
struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
const MIGRATIONS: &[Migration] = &[Migration {
    name: "000_events",
    sql: include_str!("migrations/000_events.sql"),
}];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The configured table name is not a plain SQL identifier.
    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Checks that `table` can be interpolated into SQL as an identifier.
///
/// Accepts ASCII letters, digits and underscores, not starting with a digit,
/// at most 64 characters.
///
/// # Errors
///
/// Returns `MigrationError::InvalidTableName` otherwise.
pub fn validate_table_name(table: &str) -> Result<(), MigrationError> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && table.len() <= 64
                && !table.starts_with("sqlite_")
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidTableName(table.to_string()))
    }
}

/// Runs all pending migrations for `table` against the given connection.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// Returns `MigrationError` if the table name is invalid, any migration fails
/// to execute, or the migration tracking table cannot be queried.
pub fn run_migrations(conn: &Connection, table: &str) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, table, MIGRATIONS)
}

fn run_migrations_from_list(
    conn: &Connection,
    table: &str,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    validate_table_name(table)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _sensorlog_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| MigrationError::ExecutionFailed {
        name: "_sensorlog_migrations_bootstrap".to_string(),
        source: e,
    })?;

    let mut applied = 0;

    for migration in migrations {
        let tracked_name = format!("{}:{}", migration.name, table);

        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _sensorlog_migrations WHERE name = ?1",
                [&tracked_name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;

        if already_applied {
            tracing::debug!(
                migration = %tracked_name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = %tracked_name, "applying migration");

        let failed = |e: rusqlite::Error| MigrationError::ExecutionFailed {
            name: tracked_name.clone(),
            source: e,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(&migration.sql.replace("{table}", table))
            .map_err(failed)?;
        tx.execute(
            "INSERT INTO _sensorlog_migrations (name) VALUES (?1)",
            [&tracked_name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        applied += 1;
    }

    Ok(applied)
}
