//! Postgres adapter over sqlx `PgPool`
//!
//! Idle connections are pinged before they are handed out; a connection that
//! fails the ping is dropped from the pool and acquisition moves on to the
//! next one, so callers never see a connection the server already closed.
//!
//! A statement abandoned mid-flight (its future dropped on cancellation or
//! deadline) is canceled on the server with `pg_cancel_backend`, and its
//! connection is closed rather than returned to the pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::pool::{PoolConnection, PoolConnectionMetadata};
use sqlx::postgres::{PgArguments, PgColumn, PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, PgPool, Postgres, Row as SqlxRow, TypeInfo};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::error::{DbError, Result};
use crate::pool::{Pool, RowStream, Target, TransactionConn};
use crate::row::{Row, Value};
use crate::statement::Statement;

/// Default maximum connections for the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Upper bound on establishing the initial connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Rows buffered between the connection task and a slow consumer.
const ROW_BUFFER: usize = 64;

/// Pool sizing and timeouts
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    /// Server-side `statement_timeout` set on every connection
    pub statement_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            acquire_timeout: CONNECT_TIMEOUT,
            idle_timeout: Some(Duration::from_secs(600)),
            statement_timeout: None,
        }
    }
}

/// sqlx-backed [`Pool`]
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
    target: Target,
}

impl PostgresPool {
    /// Connect using a `postgres://` URL and default settings.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let pool = PostgresPool::connect("postgres://localhost/beetravels").await?;
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        let options: PgConnectOptions = url.parse()?;
        Self::connect_with(options, PoolSettings::default()).await
    }

    /// Connect and wait until the first connection is established.
    ///
    /// # Errors
    ///
    /// Fails with [`DbError::DeadlineExceeded`] when the server cannot be
    /// reached within [`CONNECT_TIMEOUT`], or with the driver error otherwise.
    pub async fn connect_with(options: PgConnectOptions, settings: PoolSettings) -> Result<Self> {
        let target = target_of(&options);
        let options = with_statement_timeout(options, settings.statement_timeout);
        let pool = tokio::time::timeout(
            CONNECT_TIMEOUT,
            pool_options(&settings).connect_with(options),
        )
        .await
        .map_err(|_| DbError::DeadlineExceeded)??;

        tracing::info!(
            db = %target,
            max_connections = settings.max_connections,
            statement_timeout = ?settings.statement_timeout,
            "database pool ready"
        );
        Ok(Self { pool, target })
    }
}

fn with_statement_timeout(options: PgConnectOptions, timeout: Option<Duration>) -> PgConnectOptions {
    match timeout {
        Some(timeout) => {
            options.options([("statement_timeout", format!("{}ms", timeout.as_millis()))])
        }
        None => options,
    }
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        // pinged by check_liveness instead
        .test_before_acquire(false)
        .before_acquire(|conn, meta| Box::pin(check_liveness(conn, meta)))
}

async fn check_liveness(
    conn: &mut PgConnection,
    meta: PoolConnectionMetadata,
) -> std::result::Result<bool, sqlx::Error> {
    match conn.ping().await {
        Ok(()) => Ok(true),
        Err(err) => {
            tracing::warn!(
                age = ?meta.age,
                idle_for = ?meta.idle_for,
                error = %err,
                "connection failed liveness check, removing it from the pool"
            );
            Ok(false)
        }
    }
}

fn target_of(options: &PgConnectOptions) -> Target {
    Target {
        system: "postgresql",
        host: options.get_host().to_owned(),
        port: options.get_port(),
        user: options.get_username().to_owned(),
        database: options.get_database().unwrap_or_default().to_owned(),
    }
}

fn bind(stmt: &Statement) -> Query<'_, Postgres, PgArguments> {
    stmt.params()
        .iter()
        .fold(sqlx::query(stmt.sql()), |query, value| match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::TextArray(v) => query.bind(v.clone()),
            Value::Timestamp(v) => query.bind(*v),
        })
}

/// Decode a driver row. Column names are computed once per result set.
fn decode_row(row: &PgRow, columns: &mut Option<Arc<[String]>>) -> Result<Row> {
    let names = columns
        .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_owned()).collect())
        .clone();
    let values = row
        .columns()
        .iter()
        .map(|column| decode_value(row, column))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(names, values))
}

fn decode_value(row: &PgRow, column: &PgColumn) -> Result<Value> {
    let i = column.ordinal();
    let decoded = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(i).map(|v| v.map(Value::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(i)
            .map(|v| v.map(|v| Value::Int(v.into()))),
        "INT4" => row
            .try_get::<Option<i32>, _>(i)
            .map(|v| v.map(|v| Value::Int(v.into()))),
        "INT8" => row.try_get::<Option<i64>, _>(i).map(|v| v.map(Value::Int)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .map(|v| v.map(|v| Value::Float(v.into()))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(i).map(|v| v.map(Value::Float)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(i).map(|v| v.map(Value::Text))
        }
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" => row
            .try_get::<Option<Vec<String>>, _>(i)
            .map(|v| v.map(Value::TextArray)),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
            .map(|v| v.map(Value::Timestamp)),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)
            .map(|v| v.map(|v| Value::Timestamp(v.and_utc()))),
        other => {
            return Err(DbError::decode(
                column.name(),
                format!("unsupported column type {other}"),
            ))
        }
    };

    decoded
        .map(|v| v.unwrap_or(Value::Null))
        .map_err(|e| DbError::decode(column.name(), e.to_string()))
}

/// A pooled connection checked out for one statement or one transaction.
///
/// While a statement is in flight the checkout is `busy`. Dropped in that
/// state, it cancels the backend's current query and closes the connection,
/// so the server never keeps running work nobody waits for. A connection
/// left inside an open transaction is closed too; the server rolls back on
/// disconnect.
struct Checkout {
    conn: Option<PoolConnection<Postgres>>,
    pool: PgPool,
    pid: i32,
    busy: bool,
    reusable: bool,
}

impl Checkout {
    async fn acquire(pool: &PgPool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *conn)
            .await?;
        Ok(Self {
            conn: Some(conn),
            pool: pool.clone(),
            pid,
            busy: false,
            reusable: true,
        })
    }

    /// Mark a statement in flight and hand out the connection for it.
    fn start(&mut self) -> Result<&mut PgConnection> {
        let conn = self
            .conn
            .as_deref_mut()
            .ok_or_else(|| DbError::other("connection already released"))?;
        self.busy = true;
        Ok(conn)
    }

    /// The statement finished, successfully or not, and the protocol is idle.
    fn settle(&mut self) {
        self.busy = false;
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if self.busy {
            tracing::warn!(pid = self.pid, "statement abandoned, canceling it on the server");
            conn.close_on_drop();
            spawn_cancel(self.pool.clone(), self.pid);
        } else if !self.reusable {
            tracing::debug!(pid = self.pid, "closing connection left inside a transaction");
            conn.close_on_drop();
        }
    }
}

fn spawn_cancel(pool: PgPool, pid: i32) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(
        async move {
            let canceled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
                .bind(pid)
                .fetch_one(&pool)
                .await;
            match canceled {
                Ok(signaled) => tracing::debug!(pid, signaled, "backend cancel sent"),
                Err(err) => tracing::warn!(pid, error = %err, "failed to cancel backend"),
            }
        }
        .in_current_span(),
    );
}

/// Feed rows into `tx` until the result set ends or the receiver goes away.
async fn stream_rows(pool: PgPool, stmt: Statement, tx: mpsc::Sender<Result<Row>>) {
    let mut checkout = tokio::select! {
        _ = tx.closed() => return,
        checkout = Checkout::acquire(&pool) => match checkout {
            Ok(checkout) => checkout,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        },
    };
    let conn = match checkout.start() {
        Ok(conn) => conn,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
    };

    let mut rows = bind(&stmt).fetch(conn);
    let mut columns = None;
    let mut exhausted = false;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => break,
            next = rows.next() => next,
        };
        let item = match next {
            Some(Ok(row)) => decode_row(&row, &mut columns),
            Some(Err(err)) => Err(err.into()),
            None => {
                exhausted = true;
                break;
            }
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
    drop(rows);
    if exhausted {
        checkout.settle();
    }
}

#[async_trait]
impl Pool for PostgresPool {
    fn target(&self) -> &Target {
        &self.target
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let mut checkout = Checkout::acquire(&self.pool).await?;
        let done = bind(stmt).execute(checkout.start()?).await;
        checkout.settle();
        Ok(done?.rows_affected())
    }

    async fn fetch_optional(&self, stmt: &Statement) -> Result<Option<Row>> {
        let mut checkout = Checkout::acquire(&self.pool).await?;
        let row = bind(stmt).fetch_optional(checkout.start()?).await;
        checkout.settle();
        row?.map(|r| decode_row(&r, &mut None)).transpose()
    }

    fn fetch(&self, stmt: Statement) -> RowStream {
        let (tx, rx) = mpsc::channel(ROW_BUFFER);
        tokio::spawn(stream_rows(self.pool.clone(), stmt, tx).in_current_span());

        let rows = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        RowStream::new(rows.boxed())
    }

    async fn begin(&self) -> Result<Box<dyn TransactionConn>> {
        let mut checkout = Checkout::acquire(&self.pool).await?;
        checkout.reusable = false;
        let began = sqlx::Executor::execute(checkout.start()?, sqlx::raw_sql("BEGIN")).await;
        checkout.settle();
        began?;
        Ok(Box::new(PostgresTransaction { checkout }))
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!(db = %self.target, "database pool closed");
    }
}

/// Transaction on one checked-out connection. `BEGIN` / `COMMIT` /
/// `ROLLBACK` are issued directly so an abandoned transaction can close its
/// connection instead of queueing a rollback behind a running statement.
struct PostgresTransaction {
    checkout: Checkout,
}

impl PostgresTransaction {
    async fn end(&mut self, sql: &'static str) -> Result<()> {
        let done = sqlx::Executor::execute(self.checkout.start()?, sqlx::raw_sql(sql)).await;
        self.checkout.settle();
        done?;
        self.checkout.reusable = true;
        Ok(())
    }
}

#[async_trait]
impl TransactionConn for PostgresTransaction {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let done = bind(stmt).execute(self.checkout.start()?).await;
        self.checkout.settle();
        Ok(done?.rows_affected())
    }

    async fn fetch_optional(&mut self, stmt: &Statement) -> Result<Option<Row>> {
        let row = bind(stmt).fetch_optional(self.checkout.start()?).await;
        self.checkout.settle();
        row?.map(|r| decode_row(&r, &mut None)).transpose()
    }

    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        let rows = bind(stmt).fetch_all(self.checkout.start()?).await;
        self.checkout.settle();
        let mut columns = None;
        rows?.iter().map(|r| decode_row(r, &mut columns)).collect()
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.end("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.end("ROLLBACK").await
    }
}
