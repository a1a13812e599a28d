//! Database layer
//!
//! This module provides database abstraction for StoryShare.
//! It supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The database driver is selected based on configuration.
//!
//! # Architecture
//!
//! The database layer uses a trait-based abstraction (`DatabasePool`) that
//! allows the application to work with either SQLite or MySQL without
//! knowing the specific backend. Repositories write each query once and
//! expand it for both backends with [`with_pool!`].
//!
//! # Usage
//!
//! ```ignore
//! use storyshare::config::DatabaseConfig;
//! use storyshare::db::{create_pool, migrations};
//!
//! let config = DatabaseConfig::default();
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};

/// Run `$body` against the concrete pool behind a [`DynDatabasePool`].
///
/// The body is expanded once per backend, so it may use any sqlx API that
/// both SQLite and MySQL support. Both backends use `?` placeholders.
///
/// ```ignore
/// let count: i64 = with_pool!(self.pool, pool => {
///     sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await?
/// });
/// ```
#[macro_export]
macro_rules! with_pool {
    ($db:expr, $pool:ident => $body:expr) => {
        match $db.driver() {
            $crate::config::DatabaseDriver::Sqlite => {
                let $pool = $db
                    .as_sqlite()
                    .ok_or_else(|| ::anyhow::anyhow!("SQLite pool is not available"))?;
                $body
            }
            $crate::config::DatabaseDriver::Mysql => {
                let $pool = $db
                    .as_mysql()
                    .ok_or_else(|| ::anyhow::anyhow!("MySQL pool is not available"))?;
                $body
            }
        }
    };
}

/// Id of the row created by an `INSERT`.
pub trait InsertId {
    fn insert_id(&self) -> i64;
}

impl InsertId for sqlx::sqlite::SqliteQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_rowid()
    }
}

impl InsertId for sqlx::mysql::MySqlQueryResult {
    fn insert_id(&self) -> i64 {
        self.last_insert_id() as i64
    }
}
