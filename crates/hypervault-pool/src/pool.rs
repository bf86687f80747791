//! Bounded LIFO connection pool for a single database server

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::guard::PooledConnection;

/// A pool capacity unit
enum Slot<C> {
   /// No physical connection has been opened for this slot yet
   Empty,
   /// A live connection, ready to be handed out
   Ready { id: u64, conn: C },
}

/// Mutable pool state, replaced wholesale by `reinstantiate`.
///
/// Invariant: `slots.len() + checked_out.len() == max_connections`, and the
/// semaphore holds exactly one permit per entry in `slots`.
struct PoolState<C> {
   /// Process that built this state. A different pid means we were forked.
   pid: u32,
   /// LIFO stack; the last pushed slot is the next one handed out
   slots: Vec<Slot<C>>,
   semaphore: Arc<Semaphore>,
   /// Every live connection this pool has opened, idle or checked out
   live: HashSet<u64>,
   /// Connections currently owned by callers
   checked_out: HashSet<u64>,
}

impl<C> PoolState<C> {
   fn new(max_connections: usize) -> Self {
      Self {
         pid: std::process::id(),
         slots: (0..max_connections).map(|_| Slot::Empty).collect(),
         semaphore: Arc::new(Semaphore::new(max_connections)),
         live: HashSet::new(),
         checked_out: HashSet::new(),
      }
   }
}

/// State shared between a pool and the connections it has handed out
pub(crate) struct Shared<F: ConnectionFactory> {
   pool_id: usize,
   config: PoolConfig,
   factory: F,
   state: Mutex<PoolState<F::Connection>>,
   /// Connection ids are never reused, even across `reinstantiate`, so a
   /// connection from an earlier incarnation can always be told apart.
   next_id: AtomicU64,
}

impl<F: ConnectionFactory> Shared<F> {
   pub(crate) fn pool_id(&self) -> usize {
      self.pool_id
   }

   /// Puts a connection (or, when `conn` is `None`, an empty slot) back on the stack.
   ///
   /// Never blocks. Connections from an earlier incarnation of the pool are
   /// dropped; connections that were live but lost their place (disconnected
   /// while checked out, or no room on the stack) are closed on the runtime.
   pub(crate) fn release(self: &Arc<Self>, id: u64, conn: Option<F::Connection>) {
      self.check_pid();

      let mut state = self.state.lock();
      if !state.checked_out.remove(&id) {
         drop(state);
         if conn.is_some() {
            warn!(pool_id = self.pool_id, conn_id = id, "Discarding connection from a previous incarnation of the pool");
         }
         return;
      }

      let (slot, stale) = match conn {
         Some(conn) if state.live.contains(&id) => (Slot::Ready { id, conn }, None),
         Some(conn) => (Slot::Empty, Some(conn)),
         None => (Slot::Empty, None),
      };

      if state.slots.len() >= self.config.max_connections {
         drop(state);
         warn!(pool_id = self.pool_id, conn_id = id, "Pool is full, closing returned connection");
         if let Slot::Ready { conn, .. } = slot {
            self.close_detached(conn);
         }
         if let Some(conn) = stale {
            self.close_detached(conn);
         }
         return;
      }

      state.slots.push(slot);
      state.semaphore.add_permits(1);
      trace!(pool_id = self.pool_id, conn_id = id, idle = state.slots.len(), "Connection released");
      drop(state);

      if let Some(conn) = stale {
         debug!(pool_id = self.pool_id, conn_id = id, "Closing connection returned after disconnect");
         self.close_detached(conn);
      }
   }

   /// Closes a connection through the factory on the current tokio runtime.
   ///
   /// Outside a runtime there is nothing to drive the close, so the
   /// connection is dropped instead.
   fn close_detached(self: &Arc<Self>, conn: F::Connection) {
      match Handle::try_current() {
         Ok(handle) => {
            let shared = Arc::clone(self);
            handle.spawn(async move { shared.factory.close(conn).await });
         }
         Err(_) => {
            debug!(pool_id = self.pool_id, "No runtime to close connection on, dropping it");
            drop(conn);
         }
      }
   }

   /// Rebuilds the pool if this process is not the one that built it.
   fn check_pid(&self) {
      let pid = std::process::id();
      let mut state = self.state.lock();
      if state.pid == pid {
         return;
      }

      let old = mem::replace(&mut *state, PoolState::new(self.config.max_connections));
      drop(state);
      debug!(pool_id = self.pool_id, old_pid = old.pid, pid, "Process changed, rebuilding pool");
      Self::discard(old);
   }

   /// Swaps in a fresh state and returns the retired one.
   fn replace_state(&self) -> PoolState<F::Connection> {
      let fresh = PoolState::new(self.config.max_connections);
      mem::replace(&mut *self.state.lock(), fresh)
   }

   /// Drops every connection held by a retired state without talking to the
   /// server, and wakes its waiters so they move to the current semaphore.
   fn discard(old: PoolState<F::Connection>) {
      old.semaphore.close();
      drop(old);
   }
}

/// Thread-safe pool of connections to one physical database server.
///
/// Cloning is cheap and yields a handle to the same pool.
///
/// ## Usage Pattern
///
/// ```text
/// 1. Build the pool (no connections are opened yet)
/// 2. get_connection(): wait up to block_timeout for a slot, opening a
///    connection if the slot was empty
/// 3. Use the connection; dropping it returns it to the pool
/// 4. disconnect() closes idle connections, reinstantiate() starts over
/// ```
pub struct ConnectionPool<F: ConnectionFactory> {
   shared: Arc<Shared<F>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
   /// Create a pool tagged with `pool_id`.
   ///
   /// Fails with [`Error::InvalidCapacity`] when `config.max_connections` is zero.
   pub fn new(pool_id: usize, config: PoolConfig, factory: F) -> Result<Self> {
      if config.max_connections == 0 {
         return Err(Error::InvalidCapacity);
      }

      let state = PoolState::new(config.max_connections);
      Ok(Self {
         shared: Arc::new(Shared {
            pool_id,
            config,
            factory,
            state: Mutex::new(state),
            next_id: AtomicU64::new(0),
         }),
      })
   }

   /// Acquire a connection, waiting at most `block_timeout` for a free slot.
   ///
   /// If the slot handed out is empty, a new connection is opened through the
   /// factory before returning. A timeout fails with
   /// [`Error::ConnectionUnavailable`] and leaves the pool unchanged.
   pub async fn get_connection(&self) -> Result<PooledConnection<F>> {
      self.shared.check_pid();

      let timeout = self.shared.config.block_timeout;
      let deadline = Instant::now() + timeout;

      let (id, conn) = loop {
         let semaphore = Arc::clone(&self.shared.state.lock().semaphore);
         let permit = match timeout_at(deadline, semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            // The pool was reinstantiated while we waited; wait on the new one
            Ok(Err(_)) => continue,
            Err(_) => {
               debug!(pool_id = self.shared.pool_id, ?timeout, "Timed out waiting for a connection");
               return Err(Error::ConnectionUnavailable { timeout });
            }
         };

         let mut state = self.shared.state.lock();
         if !Arc::ptr_eq(&state.semaphore, &semaphore) {
            continue;
         }
         permit.forget();

         match state.slots.pop() {
            Some(Slot::Ready { id, conn }) => {
               state.checked_out.insert(id);
               break (id, Some(conn));
            }
            Some(Slot::Empty) => {
               let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
               state.checked_out.insert(id);
               break (id, None);
            }
            None => {
               warn!(pool_id = self.shared.pool_id, "Acquired a permit but the slot stack was empty");
               continue;
            }
         }
      };

      // From here on the guard owns the slot: an error or cancellation while
      // connecting puts an empty slot back.
      let mut guard = PooledConnection::new(Arc::clone(&self.shared), id, conn);
      if !guard.is_ready() {
         let conn = self
            .shared
            .factory
            .connect()
            .await
            .map_err(|e| Error::Connect(Box::new(e)))?;

         let mut state = self.shared.state.lock();
         if state.checked_out.contains(&id) {
            state.live.insert(id);
         }
         debug!(pool_id = self.shared.pool_id, conn_id = id, live = state.live.len(), "Opened new connection");
         drop(state);
         guard.set(conn);
      }

      trace!(pool_id = self.shared.pool_id, conn_id = id, "Connection acquired");
      Ok(guard)
   }

   /// Return a connection to the pool.
   ///
   /// Equivalent to dropping it. Never blocks; a connection the pool no
   /// longer tracks (returned after `disconnect`) is closed instead.
   pub fn put_connection(&self, conn: PooledConnection<F>) {
      if !conn.belongs_to(&self.shared) {
         warn!(
            pool_id = self.shared.pool_id,
            owner = conn.pool_id(),
            "Connection returned to the wrong pool, routing it to its owner"
         );
      }
      drop(conn);
   }

   /// Close every idle connection and forget all live connections.
   ///
   /// Slots that held a connection become empty. Connections checked out
   /// right now are closed when they are returned.
   pub async fn disconnect(&self) {
      let closing: Vec<F::Connection> = {
         let mut state = self.shared.state.lock();
         let mut closing = Vec::new();
         for slot in state.slots.iter_mut() {
            if let Slot::Ready { conn, .. } = mem::replace(slot, Slot::Empty) {
               closing.push(conn);
            }
         }
         state.live.clear();
         closing
      };

      debug!(pool_id = self.shared.pool_id, closing = closing.len(), "Disconnecting pool");
      for conn in closing {
         self.shared.factory.close(conn).await;
      }
   }

   /// Reset the pool to its freshly constructed state.
   ///
   /// Call [`disconnect`](Self::disconnect) first. Idle connections still in
   /// the pool are dropped, and connections checked out now are discarded
   /// when returned.
   pub fn reinstantiate(&self) {
      let old = self.shared.replace_state();
      debug!(pool_id = self.shared.pool_id, outstanding = old.checked_out.len(), "Reinstantiating pool");
      Shared::<F>::discard(old);
   }

   /// Rebuild the pool after the process was duplicated.
   ///
   /// Inherited connections are dropped without being closed on the server,
   /// since the parent may still be using them. The same reset happens
   /// automatically on the next acquire or release in a forked child.
   pub fn after_fork(&self) {
      let old = self.shared.replace_state();
      debug!(pool_id = self.shared.pool_id, old_pid = old.pid, "Rebuilding pool after fork");
      Shared::<F>::discard(old);
   }

   /// Index of this pool in its datastore
   pub fn pool_id(&self) -> usize {
      self.shared.pool_id
   }

   pub fn config(&self) -> &PoolConfig {
      &self.shared.config
   }

   pub fn max_connections(&self) -> usize {
      self.shared.config.max_connections
   }

   pub fn block_timeout(&self) -> Duration {
      self.shared.config.block_timeout
   }

   /// Number of slots (empty or holding a connection) waiting in the pool
   pub fn idle_slots(&self) -> usize {
      self.shared.state.lock().slots.len()
   }

   /// True when no connection is checked out
   pub fn is_full(&self) -> bool {
      self.idle_slots() == self.shared.config.max_connections
   }

   /// True when every slot is checked out
   pub fn is_empty(&self) -> bool {
      self.idle_slots() == 0
   }

   /// Number of live connections this pool has opened and not yet closed
   pub fn live_connections(&self) -> usize {
      self.shared.state.lock().live.len()
   }

   /// Number of connections currently held by callers
   pub fn checked_out(&self) -> usize {
      self.shared.state.lock().checked_out.len()
   }

   /// Access the factory used to open connections
   pub fn factory(&self) -> &F {
      &self.shared.factory
   }
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
   fn clone(&self) -> Self {
      Self {
         shared: Arc::clone(&self.shared),
      }
   }
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionPool<F> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let state = self.shared.state.lock();
      f.debug_struct("ConnectionPool")
         .field("pool_id", &self.shared.pool_id)
         .field("config", &self.shared.config)
         .field("idle_slots", &state.slots.len())
         .field("live", &state.live.len())
         .field("checked_out", &state.checked_out.len())
         .finish()
   }
}
