use std::{env, time::Duration};

use duckdb::{AccessMode, Config};
use log::warn;

/// Environment variable holding the DuckDB path of a named connection,
/// e.g. `warehouse_dev` -> `WAREHOUSE_DEV_DUCKDB_PATH`.
pub fn connection_env_var(connection_id: &str) -> String {
    format!(
        "{}_DUCKDB_PATH",
        connection_id.trim().to_uppercase().replace(['-', ' ', '.'], "_")
    )
}

/// Resolve a named connection to a DuckDB path using the environment.
pub fn resolve_connection(connection_id: &str) -> Option<String> {
    env::var(connection_env_var(connection_id))
        .ok()
        .filter(|path| !path.trim().is_empty())
}

/// `AccessMode` is not `Clone`, a new one is needed for each attempt.
fn same_mode(mode: &AccessMode) -> AccessMode {
    match mode {
        AccessMode::ReadOnly => AccessMode::ReadOnly,
        AccessMode::ReadWrite => AccessMode::ReadWrite,
        _ => AccessMode::Automatic,
    }
}

/// Use this function to open a DuckDB connection.  Only waits for the file lock
/// held by another process, i.e. another job writing to the same file.
/// Suggested `max_attempts = 8`, `initial_wait = Duration::from_millis(25)`.
pub fn open_with_retry(
    duckdb_path: &str,
    max_attempts: u32,
    initial_wait: Duration,
    access_mode: AccessMode,
) -> Result<duckdb::Connection, duckdb::Error> {
    let mut attempts = 0;
    let mut wait_duration = initial_wait;

    loop {
        let config = Config::default().access_mode(same_mode(&access_mode))?;
        match duckdb::Connection::open_with_flags(duckdb_path, config) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!(
                    "Retrying to open {} after error: {} (attempt {}/{})",
                    duckdb_path, e, attempts, max_attempts
                );
                std::thread::sleep(wait_duration);
                wait_duration *= 2;
            }
        }
    }
}
