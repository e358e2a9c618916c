//! Self-tuning Store Connection Pool
//!
//! Borrow a connection with [`ConnPool::acquire`]; the returned
//! [`PooledConn`] hands it back on drop, so every acquisition path releases
//! exactly once.
//!
//! ## Sizing policy
//!
//! The pool keeps a time-weighted moving average of how many connections are
//! checked out. Whenever a connection comes back while the bookkeeping total
//! exceeds `ceil(1.2 x avg_active)`, that connection is destroyed instead of
//! pooled: inventory tracks demand with ~20% headroom instead of growing to
//! the historical peak.
//!
//! The average advances on every acquire and release by weighting the prior
//! value over the interval since the last advance against the pool's whole
//! lifetime. Checked-out/total counters are atomics; the average itself and
//! the idle stack share one short-lived mutex (the tuning policy only
//! depends on the inequality, not on float-exact updates).

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::conn::StoreConnection;

/// Builds fresh store connections when the idle stack runs dry.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Box<dyn StoreConnection>;
}

/// Capacity of the idle stack.
const IDLE_STACK_CAPACITY: usize = 256;

/// Inventory headroom over the average number of active connections.
const POOL_HEADROOM: f64 = 1.2;

struct PoolState {
    idle: Vec<Box<dyn StoreConnection>>,
    last_add: Instant,
    avg_active: f64,
}

/// Pool of connections to the backing store.
pub struct ConnPool {
    factory: Box<dyn ConnectionFactory>,
    created_at: Instant,
    state: Mutex<PoolState>,
    total_conns: AtomicU32,
    active_conns: AtomicU32,
}

impl ConnPool {
    pub fn new(factory: Box<dyn ConnectionFactory>) -> Self {
        let created_at = Instant::now();
        Self {
            factory,
            created_at,
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(IDLE_STACK_CAPACITY),
                last_add: created_at,
                avg_active: 0.0,
            }),
            total_conns: AtomicU32::new(0),
            active_conns: AtomicU32::new(0),
        }
    }

    /// Borrow a connection, reusing an idle one when available.
    pub fn acquire(&self) -> PooledConn<'_> {
        let popped = {
            let mut state = self.state.lock();
            let popped = state.idle.pop();

            let active_before = self.active_conns.fetch_add(1, Ordering::AcqRel);
            self.advance_average(&mut state, active_before);
            self.total_conns.fetch_add(1, Ordering::Release);

            popped
        };

        // Building a fresh connection happens outside the lock.
        let conn = popped.unwrap_or_else(|| {
            debug!("idle stack empty, opening a new store connection");
            self.factory.connect()
        });

        PooledConn {
            pool: self,
            conn: Some(conn),
        }
    }

    fn release(&self, conn: Box<dyn StoreConnection>) {
        let mut state = self.state.lock();

        let active_before = self.active_conns.fetch_sub(1, Ordering::AcqRel);
        self.advance_average(&mut state, active_before);

        let high_water = (POOL_HEADROOM * state.avg_active).ceil() as u32;
        if self.total_conns.load(Ordering::Acquire) > high_water {
            self.total_conns.fetch_sub(1, Ordering::Release);
            debug!(
                high_water,
                avg_active = state.avg_active,
                "inventory over the high-water mark, discarding returned connection"
            );
            drop(state);
            drop(conn);
            return;
        }

        if state.idle.len() < IDLE_STACK_CAPACITY {
            state.idle.push(conn);
        } else {
            // Stack full; fall back to discarding rather than blocking.
            self.total_conns.fetch_sub(1, Ordering::Release);
            warn!("idle stack at capacity, discarding returned connection");
        }
    }

    /// Advance the time-weighted average of active connections: the prior
    /// value weighted over `[created_at, last_add]`, the pre-update active
    /// count over `[last_add, now]`.
    fn advance_average(&self, state: &mut PoolState, active_before: u32) {
        let now = Instant::now();
        let lifetime = now.duration_since(self.created_at).as_secs_f64();
        if lifetime > 0.0 {
            let prior_span = state.last_add.duration_since(self.created_at).as_secs_f64();
            let recent_span = now.duration_since(state.last_add).as_secs_f64();
            state.avg_active =
                (state.avg_active * prior_span + f64::from(active_before) * recent_span) / lifetime;
        }
        state.last_add = now;
    }

    pub fn total_conns(&self) -> u32 {
        self.total_conns.load(Ordering::Acquire)
    }

    pub fn active_conns(&self) -> u32 {
        self.active_conns.load(Ordering::Acquire)
    }
}

/// A borrowed store connection; returns to its pool on drop.
pub struct PooledConn<'a> {
    pool: &'a ConnPool,
    conn: Option<Box<dyn StoreConnection>>,
}

impl std::ops::Deref for PooledConn<'_> {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        // Present from construction until drop.
        self.conn.as_deref().expect("connection already returned")
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
