pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::errors::{AppError, AppResult};

const MAX_WRITE_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF_MS: u64 = 10;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=250;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Shared handle to the database. Every business operation runs inside one
/// `atomically` call so its reads, checks and writes commit together.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(init_db(path)?))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `op` in an immediate transaction. Write collisions roll back and
    /// re-run `op` from scratch; any other error rolls back and is returned.
    pub fn atomically<T, F>(&self, mut op: F) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>) -> AppResult<T>,
    {
        let mut attempt = 1;
        loop {
            match self.run_once(&mut op) {
                Err(e) if e.is_transient() && attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(attempt, "write collision, retrying transaction");
                    thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)));
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn run_once<T, F>(&self, op: &mut F) -> AppResult<T>
    where
        F: FnMut(&Transaction<'_>) -> AppResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Read-only access outside a transaction.
    pub fn read<T>(&self, op: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let conn = self.lock();
        op(&conn)
    }
}
