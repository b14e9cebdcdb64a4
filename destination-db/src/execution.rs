//! Traced, deadline-bound query execution over a [`Pool`]

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::Span;

use crate::call::{record_error, Call};
use crate::error::{DbError, Result};
use crate::pool::{Pool, RowStream, Target};
use crate::row::Row;
use crate::scope::Scope;
use crate::statement::Statement;
use crate::transaction::Transaction;

/// Ceiling applied to every call when the caller sets no tighter deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Shared handle to the pool; cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: Arc<dyn Pool>,
    timeout: Duration,
}

impl Database {
    pub fn new(pool: impl Pool) -> Self {
        Self::from_arc(Arc::new(pool))
    }

    pub fn from_arc(pool: Arc<dyn Pool>) -> Self {
        Self {
            pool,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the per-call ceiling. A caller deadline that is sooner still wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    pub fn target(&self) -> &Target {
        self.pool.target()
    }

    fn call(&self, scope: &Scope, stmt: &Statement) -> Call {
        Call::statement(self.pool.target(), stmt, scope, self.timeout)
    }

    /// Run a statement that returns no rows and report the affected row count.
    pub async fn execute(&self, scope: &Scope, stmt: impl Into<Statement>) -> Result<u64> {
        let stmt = stmt.into();
        let call = self.call(scope, &stmt);
        call.run(self.pool.execute(&stmt), Some(&stmt)).await
    }

    /// Run a statement and stream its rows.
    ///
    /// The first row is fetched before returning, so statement errors surface
    /// here rather than on the first poll. The connection is released and the
    /// span closed once the stream is exhausted, fails, or is dropped.
    pub async fn query(&self, scope: &Scope, stmt: impl Into<Statement>) -> Result<Rows> {
        let stmt = stmt.into();
        let call = self.call(scope, &stmt);
        let mut cursor = Cursor {
            rows: self.pool.fetch(stmt.clone()),
            call,
            stmt,
        };

        let span = cursor.call.span().clone();
        let first = match cursor.next().await? {
            Some(row) => row,
            None => return Ok(Rows::empty()),
        };

        let rest = stream::unfold(Some(cursor), |state| async move {
            let mut cursor = state?;
            match cursor.next().await {
                Ok(Some(row)) => Some((Ok(row), Some(cursor))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(Rows {
            inner: stream::once(async move { Ok(first) }).chain(rest).boxed(),
            span: Some(span),
        })
    }

    /// Prepare a single-row query. Nothing runs until the scanner is
    /// consumed, but the span and the deadline start now.
    pub fn query_row(&self, scope: &Scope, stmt: impl Into<Statement>) -> RowScanner {
        let stmt = stmt.into();
        RowScanner {
            call: self.call(scope, &stmt),
            pool: Arc::clone(&self.pool),
            stmt,
        }
    }

    /// Apply `f` to every row until the rows run out or `f` fails.
    ///
    /// The connection is released on every exit, including a panic in `f`.
    pub async fn query_each<F>(
        &self,
        scope: &Scope,
        stmt: impl Into<Statement>,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&Row) -> Result<()>,
    {
        let mut rows = self.query(scope, stmt).await?;
        while let Some(row) = rows.next().await {
            if let Err(err) = f(&row?) {
                rows.fail(&err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Acquire a connection and open a transaction on it.
    pub async fn begin(&self, scope: &Scope) -> Result<Transaction> {
        let call = Call::control(self.pool.target(), "sql begin", scope, self.timeout);
        let conn = call.run(self.pool.begin(), None).await?;
        Ok(Transaction::new(Arc::clone(&self.pool), conn, self.timeout))
    }

    /// Run `f` inside a transaction: commit when it returns `Ok`, roll back
    /// when it returns `Err`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let moved = db
    ///     .transaction(&scope, |tx| {
    ///         Box::pin(async move {
    ///             tx.execute(&scope, Statement::new("DELETE FROM destination WHERE id = $1").bind(7))
    ///                 .await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, scope: &Scope, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let mut tx = self.begin(scope).await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit(scope).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback(scope).await {
                    tracing::warn!(error = %rollback_err, "rollback after failed transaction body");
                }
                Err(err)
            }
        }
    }

    /// Close the pool. In-flight calls finish; new acquisitions fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("target", self.pool.target())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Adapter stream plus the call bounding it.
struct Cursor {
    rows: RowStream,
    call: Call,
    stmt: Statement,
}

impl Cursor {
    async fn next(&mut self) -> Result<Option<Row>> {
        let Cursor { rows, call, stmt } = self;
        call.run(async { rows.next().await.transpose() }, Some(&*stmt))
            .await
    }
}

/// Rows of one query, streamed off a held connection.
pub struct Rows {
    inner: BoxStream<'static, Result<Row>>,
    span: Option<Span>,
}

impl Rows {
    fn empty() -> Self {
        Self {
            inner: stream::empty().boxed(),
            span: None,
        }
    }

    /// Record a consumer-side failure on the query span.
    pub fn fail(&self, err: &DbError) {
        if let Some(span) = &self.span {
            record_error(span, err, None);
        }
    }

    fn finish(&mut self) {
        self.inner = stream::empty().boxed();
        self.span = None;
    }
}

impl Stream for Rows {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => self.finish(),
            _ => {}
        }
        polled
    }
}

impl fmt::Debug for Rows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rows")
            .field("open", &self.span.is_some())
            .finish_non_exhaustive()
    }
}

/// Single-row result, fetched when consumed.
pub struct RowScanner {
    call: Call,
    pool: Arc<dyn Pool>,
    stmt: Statement,
}

impl RowScanner {
    /// Fetch the row. No rows is [`DbError::NotFound`].
    pub async fn row(self) -> Result<Row> {
        let RowScanner { call, pool, stmt } = self;
        let fetch = async {
            pool.fetch_optional(&stmt)
                .await?
                .ok_or(DbError::NotFound)
        };
        call.run(fetch, Some(&stmt)).await
    }

    /// Fetch the row and extract values from it. The span covers extraction.
    pub async fn scan<T, F>(self, f: F) -> Result<T>
    where
        F: FnOnce(&Row) -> Result<T>,
    {
        let span = self.call.span().clone();
        let row = self.row().await?;
        let extracted = span.in_scope(|| f(&row));
        if let Err(err) = &extracted {
            record_error(&span, err, None);
        }
        extracted
    }
}

impl fmt::Debug for RowScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowScanner")
            .field("statement", &self.stmt.summary())
            .finish_non_exhaustive()
    }
}
