//! Backlog-bounded connection pooling.
//!
//! Wraps any connection source with two distinct bounds: `max_size` caps
//! the connections handed out at once, and `max_backlog` caps the callers
//! allowed to queue for one. Once `max_size` holders and `max_backlog`
//! waiters exist, further acquisitions fail immediately instead of
//! queueing, so a slow database cannot absorb every server task.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use silo_types::{StorageError, StorageResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Asynchronous connection source consumed by [`BoundedPool`].
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self) -> StorageResult<Self::Conn>;
}

/// Pool sizing knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections handed out at once.
    pub max_size: usize,
    /// Maximum callers queued for a connection. Zero disables queueing.
    pub max_backlog: usize,
    /// Longest a queued caller will wait before giving up.
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 25,
            max_backlog: 16,
            wait_timeout: Duration::from_secs(30),
        }
    }
}

/// A pooled connection. Dropping it returns the connection to the pool.
pub struct PooledConnection<C: Connect> {
    conn: Option<C::Conn>,
    idle: Arc<Mutex<Vec<C::Conn>>>,
    // Held for the lifetime of the loan; releasing them frees one pool
    // slot and one backlog slot.
    _conn_permit: OwnedSemaphorePermit,
    _slot_permit: OwnedSemaphorePermit,
}

impl<C: Connect> Deref for PooledConnection<C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<C: Connect> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<C: Connect> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Ok(mut idle) = self.idle.lock() {
                idle.push(conn);
            }
        }
    }
}

impl<C: Connect> PooledConnection<C> {
    /// Discard the connection instead of recycling it (e.g. after a
    /// protocol error left it in an unknown state).
    pub fn discard(mut self) {
        self.conn.take();
    }
}

/// Backpressure wrapper around a connection source.
pub struct BoundedPool<C: Connect> {
    source: C,
    config: PoolConfig,
    /// One permit per holder or waiter: `max_size + max_backlog` total.
    slots: Arc<Semaphore>,
    /// One permit per handed-out connection.
    connections: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<C::Conn>>>,
}

impl<C: Connect> BoundedPool<C> {
    pub fn new(source: C, config: PoolConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_size + config.max_backlog));
        let connections = Arc::new(Semaphore::new(config.max_size));
        Self {
            source,
            config,
            slots,
            connections,
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Acquire a connection, reusing an idle one when available.
    ///
    /// Fails immediately with a backend error once the backlog is full;
    /// queued callers fail after `wait_timeout`.
    pub async fn acquire(&self) -> StorageResult<PooledConnection<C>> {
        let slot_permit = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            StorageError::Backend("connection backlog exhausted".to_string())
        })?;

        let conn_permit = tokio::time::timeout(
            self.config.wait_timeout,
            Arc::clone(&self.connections).acquire_owned(),
        )
        .await
        .map_err(|_| StorageError::Backend("timed out waiting for a connection".to_string()))?
        .map_err(|_| StorageError::Backend("connection pool closed".to_string()))?;

        let reused = self
            .idle
            .lock()
            .map_err(|_| StorageError::Backend("connection pool poisoned".to_string()))?
            .pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self.source.connect().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
            _conn_permit: conn_permit,
            _slot_permit: slot_permit,
        })
    }

    /// Connections currently available without waiting.
    pub fn available(&self) -> usize {
        self.connections.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        opened: AtomicUsize,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connect for Counter {
        type Conn = usize;

        async fn connect(&self) -> StorageResult<usize> {
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn pool(max_size: usize, max_backlog: usize) -> BoundedPool<Counter> {
        BoundedPool::new(
            Counter::new(),
            PoolConfig {
                max_size,
                max_backlog,
                wait_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_connections_are_recycled() {
        let pool = pool(1, 0);
        let first = pool.acquire().await.unwrap();
        let id = *first;
        drop(first);
        let second = pool.acquire().await.unwrap();
        assert_eq!(*second, id);
        assert_eq!(pool.source.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backlog_exhaustion_fails_immediately() {
        let pool = pool(1, 1);
        let _held = pool.acquire().await.unwrap();

        // Occupy the single backlog slot, standing in for a queued caller.
        let _waiter_slot = Arc::clone(&pool.slots)
            .try_acquire_owned()
            .expect("backlog slot available");

        // With the holder and a waiter in place, the next attempt is
        // rejected without waiting.
        let started = std::time::Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_queued_caller_times_out() {
        let pool = pool(1, 1);
        let _held = pool.acquire().await.unwrap();
        let started = std::time::Instant::now();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_queued_caller_proceeds_when_connection_frees_up() {
        let pool = Arc::new(pool(1, 1));
        let held = pool.acquire().await.unwrap();

        let contender = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|conn| *conn) })
        };
        tokio::task::yield_now().await;
        drop(held);

        let reacquired = contender.await.unwrap();
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_discard_opens_a_fresh_connection() {
        let pool = pool(1, 0);
        let first = pool.acquire().await.unwrap();
        first.discard();
        let second = pool.acquire().await.unwrap();
        assert_eq!(*second, 1);
        assert_eq!(pool.source.opened.load(Ordering::SeqCst), 2);
    }
}
