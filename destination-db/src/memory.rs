//! In-memory pool adapter
//!
//! Serves rows from a responder closure instead of a server. Every
//! acquisition and release is counted, and faults can be injected
//! (statement latency, dead idle connections, responder errors), which makes
//! it the fixture for leak and deadline tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::{DbError, Result};
use crate::pool::{Pool, RowStream, Target, TransactionConn};
use crate::row::Row;
use crate::statement::Statement;

type Responder = dyn Fn(&Statement) -> Result<Vec<Row>> + Send + Sync;

/// Connection accounting snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Physical connections created
    pub opened: usize,
    /// Successful acquisitions
    pub acquired: usize,
    /// Connections handed back
    pub released: usize,
    /// Idle connections dropped after failing the liveness check
    pub discarded: usize,
    pub committed: usize,
    pub rolled_back: usize,
}

impl PoolStats {
    /// Connections currently checked out
    pub fn in_use(&self) -> usize {
        self.acquired.saturating_sub(self.released)
    }
}

/// Fixture-backed [`Pool`]
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<Inner>,
}

struct Inner {
    responder: Box<Responder>,
    latency: Duration,
    target: Target,
    idle: Mutex<Vec<Slot>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    opened: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

struct Slot {
    id: u64,
    alive: bool,
}

impl MemoryPool {
    /// Pool answering every statement with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Statement) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        Self::with_latency(Duration::ZERO, responder)
    }

    /// Like [`MemoryPool::new`], but every statement takes `latency` to run.
    pub fn with_latency<F>(latency: Duration, responder: F) -> Self
    where
        F: Fn(&Statement) -> Result<Vec<Row>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                responder: Box::new(responder),
                latency,
                target: Target {
                    system: "memory",
                    host: "localhost".to_string(),
                    port: 0,
                    user: "fixture".to_string(),
                    database: "fixture".to_string(),
                },
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                opened: AtomicUsize::new(0),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
                committed: AtomicUsize::new(0),
                rolled_back: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool returning the same rows for every statement.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self::new(move |_| Ok(rows.clone()))
    }

    pub fn stats(&self) -> PoolStats {
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        // released first: a release is always preceded by its acquire
        let released = load(&self.inner.released);
        PoolStats {
            opened: load(&self.inner.opened),
            acquired: load(&self.inner.acquired),
            released,
            discarded: load(&self.inner.discarded),
            committed: load(&self.inner.committed),
            rolled_back: load(&self.inner.rolled_back),
        }
    }

    /// Simulate the server closing every idle connection. Returns how many
    /// connections were affected.
    pub fn break_idle_connections(&self) -> usize {
        let mut idle = self.inner.idle();
        idle.iter_mut().for_each(|slot| slot.alive = false);
        idle.len()
    }

    fn acquire(&self) -> Result<Lease> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DbError::other("pool is closed"));
        }

        let mut idle = self.inner.idle();
        let slot = loop {
            match idle.pop() {
                Some(slot) if slot.alive => break slot,
                Some(slot) => {
                    self.inner.discarded.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        connection = slot.id,
                        "connection failed liveness check, removing it from the pool"
                    );
                }
                None => {
                    self.inner.opened.fetch_add(1, Ordering::SeqCst);
                    break Slot {
                        id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
                        alive: true,
                    };
                }
            }
        };
        drop(idle);

        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            inner: Arc::clone(&self.inner),
            slot: Some(slot),
        })
    }

    async fn run(&self, stmt: &Statement) -> Result<Vec<Row>> {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
        (self.inner.responder)(stmt)
    }
}

impl Inner {
    fn idle(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("latency", &self.inner.latency)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A checked-out connection; dropping it returns the connection.
struct Lease {
    inner: Arc<Inner>,
    slot: Option<Slot>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.inner.released.fetch_add(1, Ordering::SeqCst);
            if !self.inner.closed.load(Ordering::SeqCst) {
                self.inner.idle().push(slot);
            }
        }
    }
}

#[async_trait]
impl Pool for MemoryPool {
    fn target(&self) -> &Target {
        &self.inner.target
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let _lease = self.acquire()?;
        let rows = self.run(stmt).await?;
        Ok(rows.len() as u64)
    }

    async fn fetch_optional(&self, stmt: &Statement) -> Result<Option<Row>> {
        let _lease = self.acquire()?;
        let rows = self.run(stmt).await?;
        Ok(rows.into_iter().next())
    }

    fn fetch(&self, stmt: Statement) -> RowStream {
        let pool = self.clone();
        let opened = stream::once(async move {
            let lease = pool.acquire()?;
            let rows = pool.run(&stmt).await?;
            Ok::<_, DbError>((lease, rows))
        });

        let rows = opened.flat_map(|opened| match opened {
            Ok((lease, rows)) => stream::iter(rows)
                .map(move |row| {
                    let _held = &lease;
                    Ok(row)
                })
                .boxed(),
            Err(err) => stream::iter([Err(err)]).boxed(),
        });
        RowStream::new(rows.boxed())
    }

    async fn begin(&self) -> Result<Box<dyn TransactionConn>> {
        let lease = self.acquire()?;
        Ok(Box::new(MemoryTransaction {
            pool: self.clone(),
            lease: Some(lease),
        }))
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.idle().clear();
    }
}

struct MemoryTransaction {
    pool: MemoryPool,
    lease: Option<Lease>,
}

impl MemoryTransaction {
    fn finish(&mut self, counter: &AtomicUsize) {
        if self.lease.take().is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl TransactionConn for MemoryTransaction {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        Ok(self.pool.run(stmt).await?.len() as u64)
    }

    async fn fetch_optional(&mut self, stmt: &Statement) -> Result<Option<Row>> {
        Ok(self.pool.run(stmt).await?.into_iter().next())
    }

    async fn fetch_all(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        self.pool.run(stmt).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let inner = Arc::clone(&self.pool.inner);
        self.finish(&inner.committed);
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        let inner = Arc::clone(&self.pool.inner);
        self.finish(&inner.rolled_back);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.pool.inner);
        self.finish(&inner.rolled_back);
    }
}
