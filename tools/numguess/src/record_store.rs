use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::errors::GameError;
use crate::logging::append_run_log;
use crate::record::{sort_ranked, NewRecord, Record};

const READ_POOL_SIZE: usize = 2;

type StoreResult<T> = Result<T, GameError>;

/// Ranked record collection: inserts plus a top-K query ordered by
/// `(attempts ASC, seconds ASC)`, earlier rows first on ties.
pub trait RecordStore: Send + Sync {
    fn insert(&self, record: NewRecord) -> StoreResult<Record>;
    fn query_top(&self, limit: usize) -> StoreResult<Vec<Record>>;
}

#[derive(Debug)]
enum WriteCmd {
    Insert {
        record: NewRecord,
        now: i64,
        reply: oneshot::Sender<StoreResult<Record>>,
    },
}

pub struct SqliteRecordStore {
    write_tx: Option<mpsc::Sender<WriteCmd>>,
    read_pool: ReadPool,
    writer_join: Option<thread::JoinHandle<()>>,
    db_path: PathBuf,
}

impl Drop for SqliteRecordStore {
    fn drop(&mut self) {
        // Closing the sender ends the writer loop; join flushes in-flight inserts.
        drop(self.write_tx.take());
        if let Some(handle) = self.writer_join.take() {
            let _ = handle.join();
        }
    }
}

impl SqliteRecordStore {
    fn sender(&self) -> StoreResult<&mpsc::Sender<WriteCmd>> {
        self.write_tx
            .as_ref()
            .ok_or_else(|| GameError::Database("store is closed".to_string()))
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        append_run_log(
            "info",
            "store.open",
            json!({ "path": path.display().to_string() }),
        );
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GameError::Database(e.to_string()))?;
        }

        let existed_before_open = path.exists();

        if existed_before_open {
            let meta =
                std::fs::metadata(&path).map_err(|e| GameError::Database(e.to_string()))?;
            if meta.len() == 0 {
                return Err(GameError::Database(format!(
                    "record database is 0 bytes (corrupt): {}",
                    path.display()
                )));
            }
        }

        let mut write_conn = Connection::open(&path).map_err(db_err)?;
        configure_write_connection(&write_conn)?;

        if existed_before_open {
            let integrity: String = write_conn
                .pragma_query_value(None, "quick_check", |row| row.get(0))
                .map_err(db_err)?;
            if integrity != "ok" {
                return Err(GameError::Database(format!(
                    "record database failed integrity check: {integrity}"
                )));
            }
        }

        run_migrations(&mut write_conn)?;

        let (write_tx, mut write_rx) = mpsc::channel(32);
        let writer_join = thread::spawn(move || {
            while let Some(cmd) = write_rx.blocking_recv() {
                match cmd {
                    WriteCmd::Insert { record, now, reply } => {
                        let result = insert_record(&write_conn, &record, now);
                        let _ = reply.send(result);
                    }
                }
            }
        });

        let read_pool = ReadPool::open(&path, READ_POOL_SIZE)?;
        append_run_log(
            "info",
            "store.opened",
            json!({ "path": path.display().to_string() }),
        );

        Ok(Self {
            write_tx: Some(write_tx),
            read_pool,
            writer_join: Some(writer_join),
            db_path: path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn count(&self) -> StoreResult<usize> {
        self.read_pool.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
                .map_err(db_err)?;
            Ok(count.max(0) as usize)
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert(&self, record: NewRecord) -> StoreResult<Record> {
        let record = record.validated()?;
        append_run_log(
            "debug",
            "store.insert",
            json!({
                "name": record.name,
                "attempts": record.attempts,
                "seconds": record.seconds,
            }),
        );
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender()?
            .blocking_send(WriteCmd::Insert {
                record,
                now: system_time_unix(),
                reply: reply_tx,
            })
            .map_err(|e| GameError::StoreUnavailable(e.to_string()))?;
        let result = reply_rx
            .blocking_recv()
            .map_err(|e| GameError::StoreUnavailable(e.to_string()))?;
        if let Ok(ref row) = result {
            append_run_log(
                "info",
                "store.inserted",
                json!({
                    "record_id": row.id,
                    "attempts": row.attempts,
                    "seconds": row.seconds,
                }),
            );
        }
        result
    }

    fn query_top(&self, limit: usize) -> StoreResult<Vec<Record>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.read_pool.with_conn(|conn| query_top(conn, limit))
    }
}

#[derive(Clone)]
struct ReadPool {
    conns: Arc<Vec<Mutex<Connection>>>,
    next: Arc<AtomicUsize>,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> StoreResult<Self> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(db_err)?;
            conn.busy_timeout(std::time::Duration::from_secs(3))
                .map_err(db_err)?;
            conns.push(Mutex::new(conn));
        }

        Ok(Self {
            conns: Arc::new(conns),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let guard = self.conns[idx]
            .lock()
            .map_err(|_| GameError::Database("read connection lock poisoned".to_string()))?;
        f(&guard)
    }
}

fn configure_write_connection(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(db_err)?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let migrations = [
        (1_i64, include_str!("../migrations/0001_records.sql")),
        (2_i64, include_str!("../migrations/0002_records_rank_index.sql")),
    ];

    conn.execute_batch("BEGIN IMMEDIATE; CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL); COMMIT;")
        .map_err(db_err)?;

    for (version, sql) in migrations {
        let exists = conn
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version = ?1 LIMIT 1",
                [version],
                |_| Ok(()),
            )
            .optional()
            .map_err(db_err)?
            .is_some();

        if exists {
            continue;
        }

        let tx = conn.transaction().map_err(db_err)?;
        tx.execute_batch(sql).map_err(db_err)?;
        tx.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, system_time_unix()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        append_run_log(
            "info",
            "store.migration.applied",
            json!({ "version": version }),
        );
    }

    Ok(())
}

fn insert_record(conn: &Connection, record: &NewRecord, now: i64) -> StoreResult<Record> {
    let seconds = i64::try_from(record.seconds)
        .map_err(|_| GameError::Database("seconds out of range".to_string()))?;
    conn.execute(
        "INSERT INTO records (name, attempts, seconds, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![record.name, record.attempts, seconds, now],
    )
    .map_err(db_err)?;
    let id = conn.last_insert_rowid();
    conn.query_row(
        "SELECT id, name, attempts, seconds, created_at FROM records WHERE id = ?1",
        [id],
        row_to_record,
    )
    .map_err(db_err)
}

fn query_top(conn: &Connection, limit: usize) -> StoreResult<Vec<Record>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn
        .prepare(
            "SELECT id, name, attempts, seconds, created_at
             FROM records
             ORDER BY attempts ASC, seconds ASC, created_at ASC, id ASC
             LIMIT ?1",
        )
        .map_err(db_err)?;
    let rows = stmt.query_map([limit], row_to_record).map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let seconds = row.get::<_, i64>(3)?;
    Ok(Record {
        id: row.get(0)?,
        name: row.get(1)?,
        attempts: row.get(2)?,
        seconds: u64::try_from(seconds).map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Integer,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "negative seconds",
                )),
            )
        })?,
        created_at: row.get(4)?,
    })
}

fn db_err(error: rusqlite::Error) -> GameError {
    GameError::Database(error.to_string())
}

pub fn system_time_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// In-process store with switchable failures, for tests and `--memory-store`.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<Vec<Record>>,
    next_id: AtomicI64,
    insert_attempts: AtomicUsize,
    fail_inserts: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert(&self, record: NewRecord) -> StoreResult<Record> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(GameError::StoreUnavailable(
                "insert rejected by memory store".to_string(),
            ));
        }
        let record = record.validated()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = Record {
            id,
            name: record.name,
            attempts: record.attempts,
            seconds: record.seconds,
            created_at: system_time_unix(),
        };
        self.rows
            .lock()
            .map_err(|_| GameError::Database("memory store lock poisoned".to_string()))?
            .push(row.clone());
        Ok(row)
    }

    fn query_top(&self, limit: usize) -> StoreResult<Vec<Record>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(GameError::StoreUnavailable(
                "query rejected by memory store".to_string(),
            ));
        }
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| GameError::Database("memory store lock poisoned".to_string()))?
            .clone();
        sort_ranked(&mut rows);
        rows.truncate(limit);
        Ok(rows)
    }
}
