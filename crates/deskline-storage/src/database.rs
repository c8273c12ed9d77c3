// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection lifecycle: file creation, PRAGMAs, migrations.

use std::path::Path;

use deskline_core::DesklineError;
use tracing::debug;

use crate::migrations::run_migrations;

/// Handle to the Deskline database.
///
/// Cloning is cheap; all clones share the same background connection thread.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` in WAL mode.
    pub async fn open(path: &str) -> Result<Self, DesklineError> {
        Self::open_with(path, true).await
    }

    /// Open the database, migrating it first on a blocking thread.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, DesklineError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| DesklineError::Storage {
                source: Box::new(e),
            })?;
        }

        let owned = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), DesklineError> {
            let mut conn = rusqlite::Connection::open(&owned).map_err(storage_err)?;
            if wal_mode {
                conn.pragma_update(None, "journal_mode", "WAL")
                    .map_err(storage_err)?;
            }
            run_migrations(&mut conn)
        })
        .await
        .map_err(|e| DesklineError::Internal(format!("migration task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| DesklineError::Storage {
                source: Box::new(e),
            })?;

        conn.call(|conn| {
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Flush and close the background connection.
    pub async fn close(self) -> Result<(), DesklineError> {
        self.conn.close().await.map_err(|e| DesklineError::Storage {
            source: Box::new(e),
        })
    }
}

fn storage_err(e: rusqlite::Error) -> DesklineError {
    DesklineError::Storage {
        source: Box::new(e),
    }
}

/// Wrap a tokio-rusqlite call failure.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> DesklineError {
    DesklineError::Storage {
        source: Box::new(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_schema_and_enables_wal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("desk.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();

        let (mode, tables): (String, i64) = db
            .connection()
            .call(|conn| -> Result<(String, i64), rusqlite::Error> {
                let mode = conn.pragma_query_value(None, "journal_mode", |r| r.get(0))?;
                let tables = conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('customers', 'agents', 'tickets', 'messages', 'delay_events', 'agent_kpis')",
                    [],
                    |r| r.get(0),
                )?;
                Ok((mode, tables))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert_eq!(tables, 6);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn reopening_does_not_rerun_migrations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("desk.db");
        let path = path.to_str().unwrap();
        Database::open(path).await.unwrap().close().await.unwrap();
        let db = Database::open(path).await.unwrap();
        db.close().await.unwrap();
    }
}
