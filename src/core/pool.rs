/// Bounded per-endpoint connection pool
///
/// At most `max_active` connections are checked out at once; returned
/// connections are kept idle up to `max_idle`. A checked-out connection is a
/// [`PooledConnection`] guard that goes back to the pool when dropped, on every
/// exit path, and is discarded instead if it broke while in use.
use crate::config::PoolConfig;
use crate::core::connection::{Connection, Connector};
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use std::collections::VecDeque;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct IdleConnection {
    conn: Box<dyn Connection>,
    since: Instant,
}

struct PoolInner {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    permits: Option<Arc<Semaphore>>,
    idle: Mutex<VecDeque<IdleConnection>>,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> TejidoError {
        TejidoError::connection(
            &self.endpoint,
            io::Error::new(io::ErrorKind::NotConnected, "pool is closed"),
        )
    }

    fn release(&self, conn: Box<dyn Connection>) {
        if self.closed.load(Ordering::Acquire) || conn.is_broken() {
            debug!("Discarding connection to {}", self.endpoint);
            return;
        }
        let mut idle = self.idle();
        if self.config.max_idle >= 0 && idle.len() >= self.config.max_idle as usize {
            return;
        }
        idle.push_back(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }

    /// One eviction run over the oldest idle connections.
    async fn evict(&self) {
        let candidates: Vec<IdleConnection> = {
            let mut idle = self.idle();
            let tests = self.config.num_tests_per_eviction_run;
            let n = if tests >= 0 {
                tests as usize
            } else {
                let per = tests.unsigned_abs() as usize;
                (idle.len() + per - 1) / per
            };
            let n = n.min(idle.len());
            idle.drain(..n).collect()
        };

        let mut keep = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            let idle_for = entry.since.elapsed();
            let idle_count = self.idle().len() + keep.len();
            let hard = self
                .config
                .min_evictable_idle
                .map_or(false, |limit| idle_for > limit);
            let soft = self
                .config
                .soft_min_evictable_idle
                .map_or(false, |limit| idle_for > limit)
                && idle_count >= self.config.min_idle.max(0) as usize;
            if hard || soft {
                debug!("Evicting idle connection to {}", self.endpoint);
                continue;
            }
            if self.config.test_while_idle && !matches!(entry.conn.ping().await, Ok(true)) {
                debug!("Idle connection to {} failed its test", self.endpoint);
                continue;
            }
            keep.push(entry);
        }

        {
            let mut idle = self.idle();
            for entry in keep.into_iter().rev() {
                idle.push_front(entry);
            }
        }

        self.ensure_min_idle().await;
    }

    async fn ensure_min_idle(&self) {
        let min_idle = self.config.min_idle.max(0) as usize;
        while !self.closed.load(Ordering::Acquire) && self.idle().len() < min_idle {
            match self.connector.connect(&self.endpoint).await {
                Ok(conn) => self.release(conn),
                Err(e) => {
                    debug!("Could not top up idle connections to {}: {}", self.endpoint, e);
                    break;
                }
            }
        }
    }
}

/// Pool of connections to one endpoint
pub struct Pool {
    inner: Arc<PoolInner>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Create the pool; the evictor starts when eviction runs are configured.
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        let permits = (config.max_active > 0)
            .then(|| Arc::new(Semaphore::new(config.max_active as usize)));
        let inner = Arc::new(PoolInner {
            endpoint,
            connector,
            config,
            permits,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        });
        let evictor = Self::spawn_evictor(&inner);
        Self {
            inner,
            evictor: Mutex::new(evictor),
        }
    }

    fn spawn_evictor(inner: &Arc<PoolInner>) -> Option<JoinHandle<()>> {
        let interval = inner.config.time_between_eviction_runs?;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No runtime available, idle eviction disabled for {}",
                inner.endpoint
            );
            return None;
        };
        let weak: Weak<PoolInner> = Arc::downgrade(inner);
        Some(handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.evict().await;
            }
        }))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Number of idle connections currently retained
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Check out a connection, waiting for capacity when the pool is exhausted.
    pub async fn get(&self) -> TejidoResult<PooledConnection> {
        if self.is_closed() {
            return Err(self.inner.closed_error());
        }

        let permit = match &self.inner.permits {
            Some(permits) => {
                let acquire = Arc::clone(permits).acquire_owned();
                let acquired = match self.inner.config.max_wait {
                    Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                        TejidoError::timeout(&self.inner.endpoint, "pool exhausted")
                    })?,
                    None => acquire.await,
                };
                Some(acquired.map_err(|_| self.inner.closed_error())?)
            }
            None => None,
        };

        loop {
            let entry = self.inner.idle().pop_back();
            let Some(mut entry) = entry else {
                break;
            };
            if entry.conn.is_broken() {
                continue;
            }
            if self.inner.config.test_on_borrow && !matches!(entry.conn.ping().await, Ok(true)) {
                debug!("Idle connection to {} failed borrow test", self.inner.endpoint);
                continue;
            }
            return Ok(PooledConnection::new(entry.conn, &self.inner, permit));
        }

        let conn = self.inner.connector.connect(&self.inner.endpoint).await?;
        Ok(PooledConnection::new(conn, &self.inner, permit))
    }

    /// Drop idle connections and reject further checkouts.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(permits) = &self.inner.permits {
            permits.close();
        }
        self.inner.idle().clear();
        if let Some(evictor) = self
            .evictor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            evictor.abort();
        }
        debug!("Closed pool for {}", self.inner.endpoint);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

/// A checked-out connection; returns to its pool when dropped.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<PoolInner>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(
        conn: Box<dyn Connection>,
        pool: &Arc<PoolInner>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool: Arc::clone(pool),
            _permit: permit,
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn.as_ref(),
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn.as_mut(),
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !self.pool.config.test_on_return || conn.is_broken() {
            self.pool.release(conn);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move {
                    if matches!(conn.ping().await, Ok(true)) {
                        pool.release(conn);
                    } else {
                        debug!("Connection to {} failed return test", pool.endpoint);
                    }
                });
            }
            Err(_) => self.pool.release(conn),
        }
    }
}
