//! Connection bootstrap for context stores.
//!
//! # Responsibility
//! - Open file or named in-memory SQLite connections from `ContextOptions`.
//! - Configure pragmas and busy timeout.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections are at the latest schema version.
//! - Read-only connections are never migrated.

use super::migrations::{apply_migrations, current_user_version, latest_version};
use super::{DbError, DbResult};
use crate::options::{ContextOptions, Provider};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::time::Instant;

/// Opens the store described by `options` and brings its schema up to date.
///
/// # Side effects
/// - Creates the database file when missing (read-write mode only).
/// - Emits `db_open` logging events with duration and status.
pub fn open_store(options: &ContextOptions) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = options.mode_label();
    info!(
        "event=db_open module=db status=start mode={} read_only={}",
        mode, options.read_only
    );

    let mut conn = match open_connection(options) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_open_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, options) {
        Ok(applied) => {
            info!(
                "event=db_open module=db status=ok mode={} migrations_applied={} duration_ms={}",
                mode,
                applied,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn open_connection(options: &ContextOptions) -> rusqlite::Result<Connection> {
    let access = if options.read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    match &options.provider {
        Provider::File { path } => {
            Connection::open_with_flags(path, access | OpenFlags::SQLITE_OPEN_NO_MUTEX)
        }
        Provider::Memory { name } => Connection::open_with_flags(
            memory_uri(name),
            access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        ),
    }
}

fn bootstrap_connection(conn: &mut Connection, options: &ContextOptions) -> DbResult<usize> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(options.busy_timeout)?;

    if options.read_only {
        let db_version = current_user_version(conn)?;
        let latest_supported = latest_version();
        if db_version > latest_supported {
            return Err(DbError::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            });
        }
        if db_version < latest_supported {
            return Err(DbError::ReadOnlyOutdated {
                db_version,
                latest_supported,
            });
        }
        return Ok(0);
    }

    apply_migrations(conn)
}

/// Builds the `memdb` VFS URI for a named in-memory store.
///
/// The leading `/` makes the database visible to every connection in the
/// process that uses the same name. `memdb` takes regular database locks, so
/// contention waits on the busy timeout.
fn memory_uri(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("file:/carstore-{encoded}?vfs=memdb")
}

#[cfg(test)]
mod tests {
    use super::memory_uri;

    #[test]
    fn memory_uri_escapes_reserved_characters() {
        assert_eq!(memory_uri("fleet"), "file:/carstore-fleet?vfs=memdb");
        assert_eq!(memory_uri("a b?c"), "file:/carstore-a%20b%3Fc?vfs=memdb");
        assert_eq!(memory_uri("x/y"), "file:/carstore-x%2Fy?vfs=memdb");
    }
}
