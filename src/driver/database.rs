//! SQLite-backed storage driver with a revision log.
//!
//! Files are rows keyed by their normalized path. Every revision-recording
//! write or delete appends to `ghost_revisions`; entries stay there until
//! consumed by a promotion of the scope (see `ScopedFileService::force_update`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::backend::StorageDriver;
use super::listing::filter_listing;
use super::types::{FileRevision, ListingOptions};
use crate::constants::REVISION_AUTHOR;
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ghost_files (
    file_path   TEXT PRIMARY KEY,
    content     BLOB NOT NULL,
    modified_on TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS ghost_revisions (
    file_path  TEXT NOT NULL,
    revision   TEXT NOT NULL,
    created_by TEXT NOT NULL,
    created_on TEXT NOT NULL,
    PRIMARY KEY (file_path, revision)
);
";

/// Maps a SQLite error into a driver error with context.
fn db_err(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::driver(context, e)
}

/// Directory prefix used for "everything under `dir`" queries.
fn dir_prefix(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

/// Database storage driver.
///
/// # Thread Safety
///
/// `DatabaseStorageDriver` is `Clone` and can be shared across threads. The
/// connection sits behind a mutex and every statement runs on the blocking
/// pool; SQLite's own locking arbitrates between processes.
#[derive(Clone)]
pub struct DatabaseStorageDriver {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseStorageDriver {
    /// Opens or creates the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Parent directory cannot be created
    /// - Database file cannot be opened
    /// - Schema initialization fails
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::driver(
                    format!("Failed to create database directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(db_err(format!(
            "Failed to open database: {}",
            path.display()
        )))?;
        Self::init(conn)
    }

    /// Creates a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(db_err("Failed to open in-memory database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(db_err("Failed to set busy timeout"))?;
        conn.execute_batch(SCHEMA)
            .map_err(db_err("Failed to initialize schema"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

fn record_revision(conn: &Connection, path: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO ghost_revisions (file_path, revision, created_by, created_on)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            path,
            Uuid::new_v4().to_string(),
            REVISION_AUTHOR,
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(db_err(format!("Failed to record revision for: {path}")))?;
    Ok(())
}

#[async_trait]
impl StorageDriver for DatabaseStorageDriver {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn upsert_file(&self, path: &str, content: &[u8], record: bool) -> Result<()> {
        debug!(path, size = content.len(), record, "Database upsert");
        let path = path.to_string();
        let content = content.to_vec();
        self.run(move |conn| {
            let tx = conn
                .transaction()
                .map_err(db_err("Failed to begin transaction"))?;
            tx.execute(
                "INSERT INTO ghost_files (file_path, content, modified_on) VALUES (?1, ?2, ?3)
                 ON CONFLICT(file_path) DO UPDATE
                 SET content = excluded.content, modified_on = excluded.modified_on",
                params![path, content, Utc::now().to_rfc3339()],
            )
            .map_err(db_err(format!("Failed to write file: {path}")))?;
            if record {
                record_revision(&tx, &path)?;
            }
            tx.commit().map_err(db_err("Failed to commit transaction"))
        })
        .await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = path.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT content FROM ghost_files WHERE file_path = ?1",
                params![path],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(db_err(format!("Failed to read file: {path}")))?
            .ok_or_else(|| Error::not_found(&path))
        })
        .await
    }

    async fn file_exists(&self, path: &str) -> bool {
        let path = path.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT 1 FROM ghost_files WHERE file_path = ?1",
                params![path],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(db_err("Failed to check file existence"))
        })
        .await
        .unwrap_or(false)
    }

    async fn delete_file(&self, path: &str, record: bool) -> Result<()> {
        let path = path.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction()
                .map_err(db_err("Failed to begin transaction"))?;
            tx.execute(
                "DELETE FROM ghost_files WHERE file_path = ?1",
                params![path],
            )
            .map_err(db_err(format!("Failed to delete file: {path}")))?;
            if record {
                record_revision(&tx, &path)?;
            }
            tx.commit().map_err(db_err("Failed to commit transaction"))
        })
        .await
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let prefix = dir_prefix(path);
        let path = path.to_string();
        self.run(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM ghost_files WHERE substr(file_path, 1, ?2) = ?1",
                    params![prefix, prefix.chars().count() as i64],
                )
                .map_err(db_err(format!("Failed to delete directory: {path}")))?;
            debug!(path = %path, removed, "Database directory deleted");
            Ok(())
        })
        .await
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        self.run(move |conn| {
            let tx = conn
                .transaction()
                .map_err(db_err("Failed to begin transaction"))?;
            tx.execute("DELETE FROM ghost_files WHERE file_path = ?1", params![to])
                .map_err(db_err(format!("Failed to replace destination: {to}")))?;
            let moved = tx
                .execute(
                    "UPDATE ghost_files SET file_path = ?2, modified_on = ?3 WHERE file_path = ?1",
                    params![from, to, Utc::now().to_rfc3339()],
                )
                .map_err(db_err(format!("Failed to move {from} to {to}")))?;
            if moved == 0 {
                // Dropping the transaction rolls back the destination delete
                return Err(Error::not_found(&from));
            }
            tx.commit().map_err(db_err("Failed to commit transaction"))
        })
        .await
    }

    async fn directory_listing(
        &self,
        path: &str,
        options: &ListingOptions,
    ) -> Result<Vec<String>> {
        let prefix = dir_prefix(path);
        let path = path.to_string();
        let options = options.clone();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT file_path FROM ghost_files
                     WHERE substr(file_path, 1, ?2) = ?1 ORDER BY file_path",
                )
                .map_err(db_err(format!("Failed to list directory: {path}")))?;
            let files = stmt
                .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(db_err(format!("Failed to list directory: {path}")))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(db_err(format!("Failed to read listing of: {path}")))?;

            let relative = files
                .into_iter()
                .map(|file| file[prefix.len()..].to_string())
                .collect();
            filter_listing(relative, &options)
        })
        .await
    }

    async fn list_revisions(&self, base_dir: &str) -> Result<Vec<FileRevision>> {
        let prefix = dir_prefix(base_dir);
        let base_dir = base_dir.to_string();
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT file_path, revision, created_by, created_on FROM ghost_revisions
                     WHERE substr(file_path, 1, ?2) = ?1
                     ORDER BY created_on, revision",
                )
                .map_err(db_err(format!("Failed to list revisions of: {base_dir}")))?;
            let rows = stmt
                .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(db_err(format!("Failed to list revisions of: {base_dir}")))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err(format!("Failed to read revisions of: {base_dir}")))?;

            rows.into_iter()
                .map(|(path, revision, created_by, created_on)| {
                    let created_on = DateTime::parse_from_rfc3339(&created_on)
                        .map_err(|e| {
                            Error::driver(format!("Invalid revision timestamp for: {path}"), e)
                        })?
                        .with_timezone(&Utc);
                    Ok(FileRevision {
                        path,
                        revision,
                        created_by,
                        created_on,
                    })
                })
                .collect()
        })
        .await
    }

    async fn delete_revision(&self, path: &str, revision: &str) -> Result<()> {
        let path = path.to_string();
        let revision = revision.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM ghost_revisions WHERE file_path = ?1 AND revision = ?2",
                params![path, revision],
            )
            .map_err(db_err(format!("Failed to delete revision {revision} of: {path}")))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_driver() -> DatabaseStorageDriver {
        DatabaseStorageDriver::memory().unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_read() {
        let driver = create_driver();
        driver
            .upsert_file("data/global/a.json", b"{}", false)
            .await
            .unwrap();
        assert_eq!(driver.read_file("data/global/a.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_overwrite() {
        let driver = create_driver();
        driver.upsert_file("data/a.json", b"one", false).await.unwrap();
        driver.upsert_file("data/a.json", b"two", false).await.unwrap();
        assert_eq!(driver.read_file("data/a.json").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let driver = create_driver();
        let err = driver.read_file("data/nope.json").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_file_exists_and_delete() {
        let driver = create_driver();
        driver.upsert_file("data/a.json", b"1", false).await.unwrap();
        assert!(driver.file_exists("data/a.json").await);

        driver.delete_file("data/a.json", false).await.unwrap();
        assert!(!driver.file_exists("data/a.json").await);

        // Deleting again is fine
        driver.delete_file("data/a.json", false).await.unwrap();
    }

    #[tokio::test]
    async fn test_revisions_recorded_on_request() {
        let driver = create_driver();
        driver.upsert_file("data/bots/b1/a.json", b"1", true).await.unwrap();
        driver.upsert_file("data/bots/b1/tmp.json", b"1", false).await.unwrap();
        driver.delete_file("data/bots/b1/a.json", true).await.unwrap();
        driver.upsert_file("data/bots/b2/a.json", b"1", true).await.unwrap();

        let revisions = driver.list_revisions("data/bots/b1").await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions.iter().all(|r| r.path == "data/bots/b1/a.json"));
        assert!(revisions.iter().all(|r| r.created_by == REVISION_AUTHOR));
        assert_ne!(revisions[0].revision, revisions[1].revision);
    }

    #[tokio::test]
    async fn test_revisions_scoped_by_directory_boundary() {
        let driver = create_driver();
        driver.upsert_file("data/bots/b1/a.json", b"1", true).await.unwrap();
        driver.upsert_file("data/bots/b10/a.json", b"1", true).await.unwrap();

        let revisions = driver.list_revisions("data/bots/b1").await.unwrap();
        assert_eq!(revisions.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_revision() {
        let driver = create_driver();
        driver.upsert_file("data/a.json", b"1", true).await.unwrap();
        let revision = driver.list_revisions("data").await.unwrap().remove(0);

        driver
            .delete_revision(&revision.path, &revision.revision)
            .await
            .unwrap();

        assert!(driver.list_revisions("data").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_dir() {
        let driver = create_driver();
        driver.upsert_file("data/d/a.json", b"1", false).await.unwrap();
        driver.upsert_file("data/d/e/b.json", b"1", false).await.unwrap();
        driver.upsert_file("data/dd/c.json", b"1", false).await.unwrap();

        driver.delete_dir("data/d").await.unwrap();

        assert!(!driver.file_exists("data/d/a.json").await);
        assert!(!driver.file_exists("data/d/e/b.json").await);
        assert!(driver.file_exists("data/dd/c.json").await);
    }

    #[tokio::test]
    async fn test_move_file() {
        let driver = create_driver();
        driver.upsert_file("data/a.json", b"a", false).await.unwrap();
        driver.upsert_file("data/b.json", b"b", false).await.unwrap();

        driver.move_file("data/a.json", "data/b.json").await.unwrap();

        assert!(!driver.file_exists("data/a.json").await);
        assert_eq!(driver.read_file("data/b.json").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_move_missing_keeps_destination() {
        let driver = create_driver();
        driver.upsert_file("data/b.json", b"b", false).await.unwrap();

        let err = driver.move_file("data/a.json", "data/b.json").await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(driver.read_file("data/b.json").await.unwrap(), b"b");
    }

    #[tokio::test]
    async fn test_directory_listing() {
        let driver = create_driver();
        driver.upsert_file("data/g/b.json", b"1", false).await.unwrap();
        driver.upsert_file("data/g/sub/a.json", b"1", false).await.unwrap();
        driver.upsert_file("data/gg/c.json", b"1", false).await.unwrap();

        let files = driver
            .directory_listing("data/g", &ListingOptions::default())
            .await
            .unwrap();
        assert_eq!(files, vec!["b.json", "sub/a.json"]);

        let none = driver
            .directory_listing("data/never", &ListingOptions::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_persistent_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/storage.sqlite");

        {
            let driver = DatabaseStorageDriver::open(&path).unwrap();
            driver.upsert_file("data/a.json", b"kept", true).await.unwrap();
        }

        let driver = DatabaseStorageDriver::open(&path).unwrap();
        assert_eq!(driver.read_file("data/a.json").await.unwrap(), b"kept");
        assert_eq!(driver.list_revisions("data").await.unwrap().len(), 1);
    }
}
