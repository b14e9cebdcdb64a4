//! Traced, deadline-bound access to the destination database
//!
//! [`Database`] wraps a [`Pool`] adapter and gives every call:
//!
//! - a deadline of at most [`DEFAULT_TIMEOUT`] (or the caller's, if sooner)
//! - cancellation through the caller's [`Scope`]
//! - one `db.query` span tagged with the statement and connection target
//! - errors normalized into [`DbError`] / [`ErrorKind`]
//!
//! Connections are held by owning guards and go back to the pool on every
//! exit path, including cancellation and panics in row callbacks.
//!
//! ```ignore
//! let db = Database::new(PostgresPool::connect(&url).await?);
//! let scope = Scope::new();
//! db.query_each(&scope, "SELECT country, city FROM destination", |row| {
//!     println!("{}", row.get::<String, _>("city")?);
//!     Ok(())
//! })
//! .await?;
//! ```

mod call;
pub mod error;
pub mod execution;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod row;
pub mod scope;
pub mod statement;
pub mod transaction;

pub use error::{BoxError, DbError, ErrorKind, Result};
pub use execution::{Database, RowScanner, Rows, DEFAULT_TIMEOUT};
#[cfg(any(test, feature = "memory"))]
pub use memory::{MemoryPool, PoolStats};
pub use pool::{Pool, RowStream, Target, TransactionConn};
pub use postgres::{PoolSettings, PostgresPool};
pub use row::{ColumnIndex, FromValue, Row, Value};
pub use scope::Scope;
pub use sqlx::postgres::PgConnectOptions;
pub use statement::Statement;
pub use transaction::Transaction;
