//! RAII guard for a checked-out connection

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::factory::ConnectionFactory;
use crate::pool::Shared;

/// A connection checked out of a [`ConnectionPool`](crate::ConnectionPool).
///
/// The connection is exclusively owned by the holder of this guard and goes
/// back to the pool that created it when the guard is dropped, on every exit
/// path.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct PooledConnection<F: ConnectionFactory> {
   shared: Arc<Shared<F>>,
   id: u64,
   /// `None` only while the pool is still opening the connection
   conn: Option<F::Connection>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
   pub(crate) fn new(shared: Arc<Shared<F>>, id: u64, conn: Option<F::Connection>) -> Self {
      Self { shared, id, conn }
   }

   pub(crate) fn is_ready(&self) -> bool {
      self.conn.is_some()
   }

   pub(crate) fn set(&mut self, conn: F::Connection) {
      self.conn = Some(conn);
   }

   pub(crate) fn belongs_to(&self, shared: &Arc<Shared<F>>) -> bool {
      Arc::ptr_eq(&self.shared, shared)
   }

   /// Index of the pool that owns this connection
   pub fn pool_id(&self) -> usize {
      self.shared.pool_id()
   }

   /// Pool-unique identifier of the underlying physical connection
   pub fn connection_id(&self) -> u64 {
      self.id
   }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
   fn drop(&mut self) {
      self.shared.release(self.id, self.conn.take());
   }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
   type Target = F::Connection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect("connection not yet opened")
   }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.as_mut().expect("connection not yet opened")
   }
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PooledConnection")
         .field("pool_id", &self.pool_id())
         .field("connection_id", &self.id)
         .finish()
   }
}
