//! Transactions bound to one pooled connection

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::call::Call;
use crate::error::{DbError, Result};
use crate::pool::{Pool, TransactionConn};
use crate::row::Row;
use crate::scope::Scope;
use crate::statement::Statement;

/// An open transaction.
///
/// Every statement reuses the same connection and gets its own span.
/// `commit` and `rollback` consume the handle; dropping it without either
/// rolls back. A statement interrupted by cancellation or its deadline
/// discards the transaction, after which every call fails with
/// [`DbError::TransactionClosed`].
pub struct Transaction {
    pool: Arc<dyn Pool>,
    conn: Option<Box<dyn TransactionConn>>,
    timeout: Duration,
}

impl Transaction {
    pub(crate) fn new(pool: Arc<dyn Pool>, conn: Box<dyn TransactionConn>, timeout: Duration) -> Self {
        Self {
            pool,
            conn: Some(conn),
            timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn execute(&mut self, scope: &Scope, stmt: impl Into<Statement>) -> Result<u64> {
        let stmt = stmt.into();
        let conn = self.conn.as_mut().ok_or(DbError::TransactionClosed)?;
        let call = Call::statement(self.pool.target(), &stmt, scope, self.timeout);
        let result = call.run(conn.execute(&stmt), Some(&stmt)).await;
        self.settle(result)
    }

    /// First row of the result; no rows is [`DbError::NotFound`].
    pub async fn query_row(&mut self, scope: &Scope, stmt: impl Into<Statement>) -> Result<Row> {
        self.query_optional(scope, stmt)
            .await?
            .ok_or(DbError::NotFound)
    }

    pub async fn query_optional(
        &mut self,
        scope: &Scope,
        stmt: impl Into<Statement>,
    ) -> Result<Option<Row>> {
        let stmt = stmt.into();
        let conn = self.conn.as_mut().ok_or(DbError::TransactionClosed)?;
        let call = Call::statement(self.pool.target(), &stmt, scope, self.timeout);
        let result = call.run(conn.fetch_optional(&stmt), Some(&stmt)).await;
        self.settle(result)
    }

    pub async fn query_all(&mut self, scope: &Scope, stmt: impl Into<Statement>) -> Result<Vec<Row>> {
        let stmt = stmt.into();
        let conn = self.conn.as_mut().ok_or(DbError::TransactionClosed)?;
        let call = Call::statement(self.pool.target(), &stmt, scope, self.timeout);
        let result = call.run(conn.fetch_all(&stmt), Some(&stmt)).await;
        self.settle(result)
    }

    /// Apply `f` to every row, stopping at the first error.
    pub async fn query_each<F>(
        &mut self,
        scope: &Scope,
        stmt: impl Into<Statement>,
        f: F,
    ) -> Result<()>
    where
        F: FnMut(&Row) -> Result<()>,
    {
        self.query_all(scope, stmt).await?.iter().try_for_each(f)
    }

    pub async fn commit(mut self, scope: &Scope) -> Result<()> {
        let conn = self.conn.take().ok_or(DbError::TransactionClosed)?;
        let call = Call::control(self.pool.target(), "sql commit", scope, self.timeout);
        call.run(conn.commit(), None).await
    }

    pub async fn rollback(mut self, scope: &Scope) -> Result<()> {
        let conn = self.conn.take().ok_or(DbError::TransactionClosed)?;
        let call = Call::control(self.pool.target(), "sql rollback", scope, self.timeout);
        call.run(conn.rollback(), None).await
    }

    /// Discard the connection when a statement was interrupted mid-flight;
    /// its protocol state is unknown.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(DbError::Canceled | DbError::DeadlineExceeded) = &result {
            if self.conn.take().is_some() {
                tracing::warn!(db = %self.pool.target(), "transaction interrupted, rolled back");
            }
        }
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!(
                db = %self.pool.target(),
                "transaction dropped without commit or rollback, rolling back"
            );
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
