//! Pool capability interface
//!
//! An adapter owns the physical connections and knows how to run one
//! statement. Deadlines, cancellation and spans are layered on top by
//! [`Database`](crate::Database), so adapters stay small:
//!
//! - [`PostgresPool`](crate::PostgresPool) talks to Postgres through sqlx
//! - `MemoryPool` (feature `memory`) serves fixture rows for tests

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream};

use crate::error::Result;
use crate::row::Row;
use crate::statement::Statement;

/// Where an adapter's connections point, recorded on every statement span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub system: &'static str,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

impl Target {
    /// `host:port`
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}/{}",
            self.system, self.user, self.host, self.port, self.database
        )
    }
}

/// Rows streamed by an adapter.
///
/// The acquired connection lives inside the stream; dropping the stream
/// returns it to the pool.
pub struct RowStream {
    inner: BoxStream<'static, Result<Row>>,
}

impl RowStream {
    pub fn new(inner: BoxStream<'static, Result<Row>>) -> Self {
        Self { inner }
    }
}

impl Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").finish_non_exhaustive()
    }
}

/// A connection pool able to run statements.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// Connection target for span tags
    fn target(&self) -> &Target;

    /// Run a statement that returns no rows; yields the affected row count.
    async fn execute(&self, stmt: &Statement) -> Result<u64>;

    /// Run a statement and return its first row, if any.
    async fn fetch_optional(&self, stmt: &Statement) -> Result<Option<Row>>;

    /// Run a statement and stream its rows.
    fn fetch(&self, stmt: Statement) -> RowStream;

    /// Acquire one connection and open a transaction on it.
    async fn begin(&self) -> Result<Box<dyn TransactionConn>>;

    /// Close every connection. Further acquisitions fail.
    async fn close(&self);
}

/// A connection held exclusively by one open transaction.
///
/// Dropping it without `commit`/`rollback` rolls back and releases the
/// connection.
#[async_trait]
pub trait TransactionConn: Send {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64>;

    async fn fetch_optional(&mut self, stmt: &Statement) -> Result<Option<Row>>;

    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
