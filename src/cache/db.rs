// SPDX-License-Identifier: MPL-2.0

use crate::cache::CacheError;
use crate::cache::record::{Record, Table, select_sql, upsert_sql};
use crate::cache::schema::SCHEMA;
use crate::config::APP_NAME;
use rusqlite::Connection;
use rusqlite::types::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A committed write touched `table`; `version` is its new change counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableChange {
    pub table: Table,
    pub version: u64,
}

struct ChangeLog {
    versions: Mutex<HashMap<Table, u64>>,
    writes: AtomicU64,
    tx: broadcast::Sender<TableChange>,
}

/// Handle to the cache database for a specific user
#[derive(Clone)]
pub struct CacheDb {
    conn: Arc<Mutex<Connection>>,
    changes: Arc<ChangeLog>,
}

impl CacheDb {
    /// Open or create cache database for user
    /// Path: ~/.local/share/franky/{user_id}/cache.db
    pub fn open(user_id: &str) -> Result<Self, CacheError> {
        let path = Self::cache_path(user_id)?;
        Self::open_at(&path)
    }

    /// Open or create a cache database at an explicit path
    pub fn open_at(path: &Path) -> Result<Self, CacheError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Path(format!("failed to create cache dir: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened cache database");
        Self::from_connection(conn)
    }

    /// Private, non-persistent database
    pub fn in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        Self::migrate(&conn)?;

        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes: Arc::new(ChangeLog {
                versions: Mutex::new(HashMap::new()),
                writes: AtomicU64::new(0),
                tx,
            }),
        })
    }

    /// Run schema migrations
    fn migrate(conn: &Connection) -> Result<(), CacheError> {
        // Execute the schema (all CREATE IF NOT EXISTS)
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get XDG data directory for cache
    fn cache_path(user_id: &str) -> Result<PathBuf, CacheError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| CacheError::Path("could not find data directory".to_string()))?;

        let safe_id = user_id.replace([':', '/'], "_");

        Ok(data_dir.join(APP_NAME).join(safe_id).join("cache.db"))
    }

    /// Access connection for operations
    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("cache lock poisoned")
    }

    /// Get current unix timestamp
    pub fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    /// Run `body` inside one SQLite transaction over `tables`.
    ///
    /// The body may only write to the declared tables. If it returns an
    /// error, every participating table is left unchanged. Change
    /// notifications are sent after commit, one per touched table.
    pub fn transaction<T, E>(
        &self,
        tables: &[Table],
        body: impl FnOnce(&mut StoreTx<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<CacheError>,
    {
        let (out, touched, writes) = {
            let mut conn = self.conn();
            let tx = conn.transaction().map_err(CacheError::from)?;
            let mut store_tx = StoreTx {
                tx: &tx,
                declared: tables,
                touched: BTreeSet::new(),
                writes: 0,
            };

            // Dropping `tx` on error rolls back
            let out = body(&mut store_tx)?;
            let StoreTx { touched, writes, .. } = store_tx;
            tx.commit().map_err(CacheError::from)?;
            (out, touched, writes)
        };

        self.changes.writes.fetch_add(writes, Ordering::SeqCst);
        self.notify(touched);
        Ok(out)
    }

    fn notify(&self, touched: BTreeSet<Table>) {
        if touched.is_empty() {
            return;
        }
        let mut versions = self.changes.versions.lock().expect("change log poisoned");
        for table in touched {
            let version = versions.entry(table).or_insert(0);
            *version += 1;
            if self
                .changes
                .tx
                .send(TableChange {
                    table,
                    version: *version,
                })
                .is_err()
            {
                trace!(%table, "no subscribers for table change");
            }
        }
    }

    /// Subscribe to committed table changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TableChange> {
        self.changes.tx.subscribe()
    }

    /// Change counter of `table` (0 until the first committed write).
    pub fn version(&self, table: Table) -> u64 {
        let versions = self.changes.versions.lock().expect("change log poisoned");
        versions.get(&table).copied().unwrap_or(0)
    }

    /// Total rows written or deleted through committed transactions.
    pub fn write_count(&self) -> u64 {
        self.changes.writes.load(Ordering::SeqCst)
    }

    /// Insert or update many rows of one table atomically.
    pub fn bulk_upsert<R: Record>(&self, records: &[R]) -> Result<(), CacheError> {
        self.transaction(&[R::TABLE], |tx| tx.bulk_upsert(records))
    }

    /// Insert or update a single row.
    pub fn upsert<R: Record>(&self, record: &R) -> Result<(), CacheError> {
        self.transaction(&[R::TABLE], |tx| tx.upsert(record))
    }

    pub fn find_by_id<R: Record>(&self, id: &str) -> Result<Option<R>, CacheError> {
        find_by_id(&self.conn(), id)
    }

    /// Rows for the ids that exist; missing ids are omitted, order is unspecified.
    pub fn find_many_by_ids<R: Record>(&self, ids: &[String]) -> Result<Vec<R>, CacheError> {
        find_many_by_ids(&self.conn(), ids)
    }

    pub fn delete<R: Record>(&self, id: &str) -> Result<bool, CacheError> {
        self.transaction(&[R::TABLE], |tx| tx.delete::<R>(id))
    }

    /// Remove every row of `table`.
    pub fn clear(&self, table: Table) -> Result<(), CacheError> {
        self.transaction(&[table], |tx| tx.clear(table))
    }

    /// Remove every row of every table (sign-out).
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.transaction(&Table::ALL, |tx| {
            for table in Table::ALL {
                tx.clear(table)?;
            }
            Ok(())
        })
    }

    /// Cleanup old entries with sensible defaults:
    /// - Streams: 24 hours (stream order changes constantly)
    /// - Orphan posts: 7 days (posts not in any stream)
    pub fn cleanup_stale(&self) -> Result<(), CacheError> {
        let now = Self::now();
        let stream_cutoff = now - (24 * 60 * 60);
        let post_cutoff = now - (7 * 24 * 60 * 60);

        let tables = [
            Table::PostStreams,
            Table::UserStreams,
            Table::PostDetails,
            Table::PostCounts,
            Table::PostTags,
        ];
        self.transaction(&tables, |tx| {
            tx.execute(
                Table::PostStreams,
                "DELETE FROM post_streams WHERE fetched_at < ?1",
                &[Value::Integer(stream_cutoff)],
            )?;
            tx.execute(
                Table::UserStreams,
                "DELETE FROM user_streams WHERE fetched_at < ?1",
                &[Value::Integer(stream_cutoff)],
            )?;

            for table in [Table::PostDetails, Table::PostCounts, Table::PostTags] {
                let sql = format!(
                    r#"
                    DELETE FROM {table}
                    WHERE fetched_at < ?1
                    AND id NOT IN (
                        SELECT je.value FROM post_streams ps, json_each(ps.stream) je
                    )
                    "#
                );
                tx.execute(table, &sql, &[Value::Integer(post_cutoff)])?;
            }
            Ok::<_, CacheError>(())
        })
    }
}

/// Write access to the tables declared for one transaction.
pub struct StoreTx<'a> {
    tx: &'a rusqlite::Transaction<'a>,
    declared: &'a [Table],
    touched: BTreeSet<Table>,
    writes: u64,
}

impl StoreTx<'_> {
    fn check_declared(&self, table: Table) -> Result<(), CacheError> {
        if self.declared.contains(&table) {
            Ok(())
        } else {
            Err(CacheError::UndeclaredTable(table))
        }
    }

    fn write_row<R: Record>(&mut self, record: &R, sql: &str) -> Result<(), CacheError> {
        let mut params: Vec<Value> = Vec::with_capacity(R::COLUMNS.len() + 2);
        params.push(Value::Text(record.id().to_string()));
        params.extend(record.values()?);
        params.push(Value::Integer(CacheDb::now()));

        self.tx
            .execute(sql, rusqlite::params_from_iter(params.iter()))?;
        self.writes += 1;
        self.touched.insert(R::TABLE);
        Ok(())
    }

    /// Insert or update many rows. Keys are validated before anything is written.
    pub fn bulk_upsert<R: Record>(&mut self, records: &[R]) -> Result<(), CacheError> {
        self.check_declared(R::TABLE)?;
        for record in records {
            R::KEY.validate(record.id())?;
        }

        let sql = upsert_sql::<R>();
        for record in records {
            self.write_row(record, &sql)
                .map_err(|e| CacheError::BulkOperationFailed {
                    table: R::TABLE,
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Insert or update a single row.
    pub fn upsert<R: Record>(&mut self, record: &R) -> Result<(), CacheError> {
        self.check_declared(R::TABLE)?;
        R::KEY.validate(record.id())?;

        let sql = upsert_sql::<R>();
        self.write_row(record, &sql)
            .map_err(|e| CacheError::CreateFailed {
                table: R::TABLE,
                id: record.id().to_string(),
                source: Box::new(e),
            })
    }

    pub fn find_by_id<R: Record>(&self, id: &str) -> Result<Option<R>, CacheError> {
        find_by_id(self.tx, id)
    }

    pub fn find_many_by_ids<R: Record>(&self, ids: &[String]) -> Result<Vec<R>, CacheError> {
        find_many_by_ids(self.tx, ids)
    }

    /// Every row of a table (used to scan small tables such as streams).
    pub fn find_all<R: Record>(&self) -> Result<Vec<R>, CacheError> {
        let mut stmt = self.tx.prepare(&select_sql::<R>())?;
        let rows = stmt.query_map([], R::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete<R: Record>(&mut self, id: &str) -> Result<bool, CacheError> {
        self.check_declared(R::TABLE)?;
        let sql = format!("DELETE FROM {} WHERE id = ?1", R::TABLE.name());
        let deleted = self.tx.execute(&sql, [id])?;
        if deleted > 0 {
            self.writes += deleted as u64;
            self.touched.insert(R::TABLE);
        }
        Ok(deleted > 0)
    }

    pub fn clear(&mut self, table: Table) -> Result<(), CacheError> {
        self.check_declared(table)?;
        let deleted = self.tx.execute(&format!("DELETE FROM {}", table.name()), [])?;
        if deleted > 0 {
            self.writes += deleted as u64;
            self.touched.insert(table);
        }
        Ok(())
    }

    /// Raw statement against a declared table.
    pub(crate) fn execute(
        &mut self,
        table: Table,
        sql: &str,
        params: &[Value],
    ) -> Result<usize, CacheError> {
        self.check_declared(table)?;
        let changed = self
            .tx
            .execute(sql, rusqlite::params_from_iter(params.iter()))?;
        if changed > 0 {
            self.writes += changed as u64;
            self.touched.insert(table);
        }
        Ok(changed)
    }
}

fn find_by_id<R: Record>(conn: &Connection, id: &str) -> Result<Option<R>, CacheError> {
    let sql = format!("{} WHERE id = ?1", select_sql::<R>());
    let mut stmt = conn.prepare(&sql)?;

    match stmt.query_row([id], R::from_row) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(other) => Err(CacheError::Database(other)),
    }
}

fn find_many_by_ids<R: Record>(conn: &Connection, ids: &[String]) -> Result<Vec<R>, CacheError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    // Build query with placeholders
    let placeholders: Vec<_> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "{} WHERE id IN ({})",
        select_sql::<R>(),
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), R::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
