//! # quietmail-store
//!
//! Local message storage for `QuietMail` on a single `SQLite` file.
//!
//! This crate provides:
//! - Four fixed folders (`inbox`, `sent`, `drafts`, `trash`), one table each
//! - A lazily created, pooled engine with cached health probes
//! - Transactions with timeouts, nested savepoints and a read-only variant
//! - Parameterized statement building, including multi-folder keyword search
//! - A repository with batch operations, progress reporting and cancellation
//! - Typed search with filters, ordering and pagination
//! - Health checks, a background health monitor and in-process metrics
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use quietmail_store::{DatabaseConfig, EngineManager, Folder, MessageRepository};
//!
//! # async fn run() -> quietmail_store::Result<()> {
//! let engine = Arc::new(EngineManager::new("mail.db", DatabaseConfig::from_env()?)?);
//! let repository = MessageRepository::new(Arc::clone(&engine));
//! println!("{} messages in the inbox", repository.count(Folder::Inbox).await?);
//! engine.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;
mod error;
pub mod folder;
pub mod health;
pub mod message;
pub mod metrics;
pub mod query;
pub mod repository;
pub mod search;
pub mod transaction;

pub use config::DatabaseConfig;
pub use engine::{EngineManager, PoolStats};
pub use error::{Error, Result};
pub use folder::{Column, Folder};
pub use health::{HealthCheckResult, HealthChecker, HealthMonitor, HealthStatus, SystemHealth};
pub use message::{DeliveryStatus, FolderData, Message, MessageId};
pub use metrics::{MetricStats, MetricsCollector, MetricsSnapshot};
pub use repository::{BatchOptions, BatchResult, MessageRepository};
pub use search::{
    OrderBy, SearchField, SearchFilter, SearchOperator, SearchQuery, SearchResult, SearchService,
};
pub use transaction::{ReadOnlyTransaction, Savepoint, Transaction, TransactionManager};
