//! Connection pooling: round-robin live set, dead-connection quarantine
//! with exponential resurrection backoff.
//!
//! All mutating operations are guarded by a single [`std::sync::Mutex`]
//! around the pool's internal state; the round-robin cursor and dead-count
//! map only ever change under that lock, matching the "guard each mutating
//! operation" rule in the concurrency model.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::connection::{ConnectionId, ConnectionLike};

/// Pool behavior shared by the round-robin pool and the single-node dummy
/// pool.
pub trait ConnectionPool: std::fmt::Debug + Send + Sync {
    /// Return a live connection, resurrecting dead ones whose timer has
    /// elapsed first. Never returns `None`: if every connection is dead,
    /// the one with the smallest `resurrect_at` is force-resurrected.
    fn get_connection(&self) -> Arc<dyn ConnectionLike>;

    /// Remove `connection` from the live set and schedule it for
    /// resurrection after an exponentially increasing delay.
    fn mark_dead(&self, connection: &Arc<dyn ConnectionLike>);

    /// Reset the failure count for `connection` to zero.
    fn mark_live(&self, connection: &Arc<dyn ConnectionLike>);

    /// All currently live connections, in round-robin order.
    fn connections(&self) -> Vec<Arc<dyn ConnectionLike>>;

    /// Number of consecutive failures recorded for `connection`, or 0 if
    /// it has never failed (or has been marked live since).
    fn dead_count(&self, connection: &Arc<dyn ConnectionLike>) -> u32;

    /// Close every connection the pool knows about, live or quarantined.
    fn close(&self);
}

#[derive(Debug)]
struct DeadEntry {
    resurrect_at: Instant,
    connection: Arc<dyn ConnectionLike>,
}

impl PartialEq for DeadEntry {
    fn eq(&self, other: &Self) -> bool {
        self.resurrect_at == other.resurrect_at
    }
}
impl Eq for DeadEntry {}
impl PartialOrd for DeadEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DeadEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so a std::collections::BinaryHeap (a max-heap) pops the
        // *soonest* resurrection first.
        other.resurrect_at.cmp(&self.resurrect_at)
    }
}

#[derive(Debug, Default)]
struct State {
    connections: Vec<Arc<dyn ConnectionLike>>,
    cursor: usize,
    dead: std::collections::BinaryHeap<DeadEntry>,
    dead_count: HashMap<ConnectionId, u32>,
}

/// The general-purpose pool: round-robin live set, exponential-backoff dead
/// quarantine.
#[derive(Debug)]
pub struct RoundRobinConnectionPool {
    state: Mutex<State>,
    dead_timeout: Duration,
}

impl RoundRobinConnectionPool {
    pub fn new(
        mut connections: Vec<Arc<dyn ConnectionLike>>,
        dead_timeout: Duration,
        randomize: bool,
    ) -> Self {
        if randomize {
            connections.shuffle(&mut rand::rng());
        }
        RoundRobinConnectionPool {
            state: Mutex::new(State {
                connections,
                cursor: 0,
                dead: std::collections::BinaryHeap::new(),
                dead_count: HashMap::new(),
            }),
            dead_timeout,
        }
    }

    fn resurrect(state: &mut State, force: bool) {
        let now = Instant::now();
        loop {
            let should_pop = match state.dead.peek() {
                Some(entry) => force || entry.resurrect_at <= now,
                None => false,
            };
            if !should_pop {
                break;
            }
            if let Some(entry) = state.dead.pop() {
                tracing::debug!(connection = %entry.connection.host(), force, "resurrecting connection");
                state.connections.push(entry.connection);
            }
            if !force {
                continue;
            }
            // force=true only resurrects the single soonest entry.
            break;
        }
    }
}

impl ConnectionPool for RoundRobinConnectionPool {
    fn get_connection(&self) -> Arc<dyn ConnectionLike> {
        let mut state = self.state.lock().unwrap();
        Self::resurrect(&mut state, false);
        if state.connections.is_empty() {
            Self::resurrect(&mut state, true);
        }
        if state.connections.is_empty() {
            // Every connection is dead and somehow resurrect() had nothing
            // to promote (empty pool entirely); this can only happen if
            // the pool was constructed with zero connections.
            panic!("connection pool has no connections to return");
        }
        let idx = state.cursor % state.connections.len();
        state.cursor = state.cursor.wrapping_add(1);
        Arc::clone(&state.connections[idx])
    }

    fn mark_dead(&self, connection: &Arc<dyn ConnectionLike>) {
        let mut state = self.state.lock().unwrap();
        state
            .connections
            .retain(|c| c.id() != connection.id());
        let failures = state
            .dead_count
            .entry(connection.id().clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let backoff = 2u64.saturating_pow((*failures).saturating_sub(1)).min(60);
        let delay = self.dead_timeout.mul_f64(backoff as f64);
        tracing::debug!(
            connection = %connection.host(),
            failures = *failures,
            backoff_s = delay.as_secs_f64(),
            "marking connection dead"
        );
        state.dead.push(DeadEntry {
            resurrect_at: Instant::now() + delay,
            connection: Arc::clone(connection),
        });
    }

    fn mark_live(&self, connection: &Arc<dyn ConnectionLike>) {
        let mut state = self.state.lock().unwrap();
        state.dead_count.insert(connection.id().clone(), 0);
    }

    fn connections(&self) -> Vec<Arc<dyn ConnectionLike>> {
        self.state.lock().unwrap().connections.clone()
    }

    fn dead_count(&self, connection: &Arc<dyn ConnectionLike>) -> u32 {
        self.state
            .lock()
            .unwrap()
            .dead_count
            .get(connection.id())
            .copied()
            .unwrap_or(0)
    }

    fn close(&self) {
        let state = self.state.lock().unwrap();
        tracing::info!(count = state.connections.len() + state.dead.len(), "closing connection pool");
        for c in &state.connections {
            c.close();
        }
        for entry in state.dead.iter() {
            entry.connection.close();
        }
    }
}

/// Degenerate pool for the single-host case: `get_connection` always
/// returns the one connection; `mark_dead`/`mark_live` are no-ops, since
/// quarantining the only known node would leave the Transport with nothing
/// to talk to.
#[derive(Debug)]
pub struct DummyConnectionPool {
    connection: Arc<dyn ConnectionLike>,
}

impl DummyConnectionPool {
    pub fn new(connection: Arc<dyn ConnectionLike>) -> Self {
        DummyConnectionPool { connection }
    }
}

impl ConnectionPool for DummyConnectionPool {
    fn get_connection(&self) -> Arc<dyn ConnectionLike> {
        Arc::clone(&self.connection)
    }

    fn mark_dead(&self, _connection: &Arc<dyn ConnectionLike>) {}

    fn mark_live(&self, _connection: &Arc<dyn ConnectionLike>) {}

    fn connections(&self) -> Vec<Arc<dyn ConnectionLike>> {
        vec![Arc::clone(&self.connection)]
    }

    fn dead_count(&self, _connection: &Arc<dyn ConnectionLike>) -> u32 {
        0
    }

    fn close(&self) {
        self.connection.close();
    }
}
