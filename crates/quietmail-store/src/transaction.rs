//! Transactions with a wall-clock timeout and nested savepoints.
//!
//! A unit of work is opened with [`TransactionManager::begin`], run against
//! [`Transaction::conn`], and closed with [`Transaction::finish`], which
//! decides between commit and rollback:
//!
//! 1. If the transaction outlived its timeout it is rolled back and
//!    [`Error::TransactionTimeout`] is returned, whatever the outcome was.
//! 2. If the outcome is an error it is rolled back and the error returned
//!    unchanged.
//! 3. Otherwise it is committed.
//!
//! Dropping a [`Transaction`] or [`Savepoint`] without finishing it rolls it
//! back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnection, SqlitePool};
use sqlx::{Connection, Sqlite};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::engine::EngineManager;
use crate::metrics::MetricsCollector;
use crate::{Error, Result};

/// Opens transactions on a pool.
#[derive(Clone)]
pub struct TransactionManager {
    pool: SqlitePool,
    timeout: Duration,
    slow_threshold: Option<Duration>,
    metrics: Arc<MetricsCollector>,
}

impl TransactionManager {
    /// Create a manager using the timeouts in `config`.
    #[must_use]
    pub fn new(pool: SqlitePool, config: &DatabaseConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            pool,
            timeout: config.transaction_timeout,
            slow_threshold: config
                .log_slow_queries
                .then_some(config.slow_query_threshold),
            metrics,
        }
    }

    /// Create a manager for `engine`'s pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the pool cannot be created.
    pub async fn for_engine(engine: &EngineManager) -> Result<Self> {
        let pool = engine.get_engine().await?;
        Ok(Self::new(pool, engine.config(), Arc::clone(engine.metrics())))
    }

    /// Override the transaction timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acquire a connection and begin a write transaction.
    ///
    /// The transaction opens with `BEGIN IMMEDIATE` and holds the write lock
    /// from the start; other writers wait on `busy_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if no connection can be acquired or
    /// `BEGIN` fails.
    pub async fn begin(&self) -> Result<Transaction> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|source| Error::Transaction {
                context: "begin",
                source,
            })?;
        debug!(timeout = ?self.timeout, "Transaction started");
        Ok(self.wrap(tx))
    }

    /// Begin a deferred transaction that is always rolled back.
    ///
    /// All reads inside it see one snapshot of the database.
    ///
    /// # Errors
    ///
    /// See [`begin`](Self::begin).
    pub async fn begin_read_only(&self) -> Result<ReadOnlyTransaction> {
        let tx = self.pool.begin().await.map_err(|source| Error::Transaction {
            context: "begin read-only",
            source,
        })?;
        debug!("Read-only transaction started");
        Ok(ReadOnlyTransaction(self.wrap(tx)))
    }

    fn wrap(&self, tx: sqlx::Transaction<'static, Sqlite>) -> Transaction {
        Transaction {
            tx,
            started: Instant::now(),
            timeout: self.timeout,
            slow_threshold: self.slow_threshold,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// An open transaction holding one pooled connection.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    started: Instant,
    timeout: Duration,
    slow_threshold: Option<Duration>,
    metrics: Arc<MetricsCollector>,
}

impl Transaction {
    /// Connection to run statements on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Time since `BEGIN`.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Open a savepoint, named `sp_<depth>` when `name` is `None`.
    ///
    /// The savepoint borrows the transaction, so only one top-level
    /// savepoint is open at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if the savepoint cannot be created.
    pub async fn savepoint(&mut self, name: Option<&str>) -> Result<Savepoint<'_>> {
        Savepoint::open(&mut self.tx, name, 1).await
    }

    /// Commit, subject to the timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionTimeout`] if the timeout elapsed (the
    /// transaction is rolled back), or [`Error::Transaction`] if `COMMIT`
    /// fails.
    pub async fn commit(self) -> Result<()> {
        self.finish(Ok(())).await
    }

    /// Roll back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if `ROLLBACK` fails.
    pub async fn rollback(self) -> Result<()> {
        let elapsed = self.elapsed();
        self.metrics.increment("transaction.rollbacks", 1.0, &[]);
        self.metrics
            .record_duration("transaction.duration", elapsed, &[]);
        self.tx.rollback().await.map_err(|source| Error::Transaction {
            context: "rollback",
            source,
        })
    }

    /// Close the transaction according to `outcome` and the timeout.
    ///
    /// # Errors
    ///
    /// Returns the timeout error, the original error from `outcome`, or a
    /// commit failure.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let elapsed = self.elapsed();
        if elapsed > self.timeout {
            let timeout = self.timeout;
            warn!(?elapsed, ?timeout, "Transaction exceeded timeout, rolling back");
            self.metrics.increment("transaction.timeouts", 1.0, &[]);
            if let Err(e) = self.rollback().await {
                warn!(error = %e, "Rollback after timeout failed");
            }
            return Err(Error::TransactionTimeout { elapsed, timeout });
        }

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                if err.is_not_found() {
                    debug!(error = %err, "Transaction rolled back");
                } else {
                    warn!(error = %err, "Transaction failed, rolling back");
                }
                if let Err(e) = self.rollback().await {
                    warn!(error = %e, "Rollback failed");
                }
                return Err(err);
            }
        };

        let commit_started = Instant::now();
        let metrics = Arc::clone(&self.metrics);
        let slow_threshold = self.slow_threshold;
        self.tx.commit().await.map_err(|source| Error::Transaction {
            context: "commit",
            source,
        })?;

        let commit_time = commit_started.elapsed();
        metrics.increment("transaction.commits", 1.0, &[]);
        metrics.record_duration("transaction.duration", elapsed + commit_time, &[]);
        if slow_threshold.is_some_and(|t| commit_time > t) {
            warn!(?commit_time, "Slow transaction commit");
        }
        debug!(?elapsed, "Transaction committed");
        Ok(value)
    }
}

/// A transaction whose work is always discarded.
pub struct ReadOnlyTransaction(Transaction);

impl ReadOnlyTransaction {
    /// Connection to run statements on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        self.0.conn()
    }

    /// Roll back and return `outcome`.
    ///
    /// # Errors
    ///
    /// Returns the error from `outcome`, or a rollback failure.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let rolled_back = self.0.rollback().await;
        let value = outcome?;
        rolled_back?;
        Ok(value)
    }
}

/// A nested scope inside a transaction, backed by `SAVEPOINT`.
///
/// Releasing keeps its work in the enclosing transaction; rolling back (or
/// dropping) discards only the work done since it was opened.
pub struct Savepoint<'t> {
    tx: sqlx::Transaction<'t, Sqlite>,
    name: String,
    depth: u32,
}

impl<'t> Savepoint<'t> {
    async fn open(conn: &'t mut SqliteConnection, name: Option<&str>, depth: u32) -> Result<Self> {
        let name = name.map_or_else(|| format!("sp_{depth}"), ToString::to_string);
        let tx = conn.begin().await.map_err(|source| Error::Transaction {
            context: "savepoint",
            source,
        })?;
        debug!(savepoint = %name, "Savepoint created");
        Ok(Self { tx, name, depth })
    }

    /// Savepoint label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection to run statements on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Open a savepoint nested inside this one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if the savepoint cannot be created.
    pub async fn savepoint(&mut self, name: Option<&str>) -> Result<Savepoint<'_>> {
        Savepoint::open(&mut self.tx, name, self.depth + 1).await
    }

    /// Keep the work done in this savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if `RELEASE` fails.
    pub async fn release(self) -> Result<()> {
        self.tx.commit().await.map_err(|source| Error::Transaction {
            context: "release savepoint",
            source,
        })?;
        debug!(savepoint = %self.name, "Savepoint released");
        Ok(())
    }

    /// Discard the work done in this savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transaction`] if `ROLLBACK TO` fails.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(|source| Error::Transaction {
            context: "rollback savepoint",
            source,
        })?;
        debug!(savepoint = %self.name, "Savepoint rolled back");
        Ok(())
    }

    /// Release on success, roll back on error, returning `outcome`.
    ///
    /// # Errors
    ///
    /// Returns the error from `outcome`, or a savepoint failure.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.release().await?;
                Ok(value)
            }
            Err(err) => {
                debug!(savepoint = %self.name, error = %err, "Savepoint failed");
                self.rollback().await?;
                Err(err)
            }
        }
    }
}
