//! Shard-aware facade over one connection pool per physical server

use futures::future::BoxFuture;
use hypervault_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PooledConnection};
use tracing::{debug, warn};

use crate::config::DatastoreConfig;
use crate::connector::PgConnector;
use crate::router::{ShardRange, ShardRouter};
use crate::{Error, Result};

/// Routes work on a logical shard to the pool of the server that hosts it.
///
/// ## Architecture
///
/// ```text
/// shard id --ShardRouter--> pool index --ConnectionPool--> connection
/// ```
///
/// There is no global lock: each pool bounds its own connections, and the
/// router's memo cache is safe to share. Wrap the datastore in an `Arc` to
/// use it from several tasks.
pub struct Datastore<F: ConnectionFactory = PgConnector> {
   pools: Vec<ConnectionPool<F>>,
   router: ShardRouter,
}

impl Datastore<PgConnector> {
   /// Build one PostgreSQL pool per configured server.
   ///
   /// No connection is opened until a shard is first used. Fails fast on a
   /// non-positive `pool_max` or invalid shard ranges.
   pub fn new(config: &DatastoreConfig) -> Result<Self> {
      let entries = config
         .connections
         .iter()
         .map(|conn| (conn.shards, PgConnector::new(conn, config.log_statements)));
      Self::with_factories(entries, config.pool_config())
   }
}

impl<F: ConnectionFactory> Datastore<F> {
   /// Build a datastore from `(shard range, factory)` pairs in pool order.
   pub fn with_factories<I>(entries: I, pool_config: PoolConfig) -> Result<Self>
   where
      I: IntoIterator<Item = (ShardRange, F)>,
   {
      let mut ranges = Vec::new();
      let mut pools = Vec::new();
      for (pool_id, (range, factory)) in entries.into_iter().enumerate() {
         ranges.push(range);
         pools.push(ConnectionPool::new(pool_id, pool_config.clone(), factory)?);
      }

      let router = ShardRouter::new(ranges)?;
      debug!(
         pools = pools.len(),
         max_connections = pool_config.max_connections,
         block_timeout = ?pool_config.block_timeout,
         "Datastore configured"
      );

      Ok(Self { pools, router })
   }

   /// The pool owning `shard_id`
   pub fn pool_for(&self, shard_id: i64) -> Result<&ConnectionPool<F>> {
      self
         .router
         .resolve(shard_id)
         .and_then(|pool_id| self.pools.get(pool_id))
         .ok_or(Error::UnroutableShard(shard_id))
   }

   /// Check out a connection to the server hosting `shard_id`.
   ///
   /// The connection goes back to its pool when dropped or passed to
   /// [`put_connection`](Self::put_connection).
   pub async fn get_connection(&self, shard_id: i64) -> Result<PooledConnection<F>> {
      let pool = self.pool_for(shard_id)?;
      Ok(pool.get_connection().await?)
   }

   /// Send a connection back to the pool it came from.
   pub fn put_connection(&self, conn: PooledConnection<F>) {
      match self.pools.get(conn.pool_id()) {
         Some(pool) => pool.put_connection(conn),
         None => {
            warn!(pool_id = conn.pool_id(), "Connection from an unknown pool");
            drop(conn);
         }
      }
   }

   /// Scoped connection to the server hosting `shard_id`.
   ///
   /// The guard derefs to the connection and hands it back to its pool when
   /// it goes out of scope, including on `?` and unwinding.
   ///
   /// ```no_run
   /// # async fn example(db: hypervault::Datastore) -> hypervault::Result<()> {
   /// let mut conn = db.cursor(12).await?;
   /// sqlx::query("SELECT 1").execute(&mut *conn).await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn cursor(&self, shard_id: i64) -> Result<PooledConnection<F>> {
      let conn = self.get_connection(shard_id).await?;
      debug!(shard_id, pool_id = conn.pool_id(), "Cursor opened");
      Ok(conn)
   }

   /// Run `f` with a connection to the server hosting `shard_id`.
   ///
   /// The connection is returned to its pool however `f` finishes.
   ///
   /// ```no_run
   /// # async fn example(db: hypervault::Datastore) -> hypervault::Result<()> {
   /// let version: String = db
   ///    .with_cursor(5, |conn| {
   ///       Box::pin(async move {
   ///          Ok(sqlx::query_scalar("SELECT version()").fetch_one(conn).await?)
   ///       })
   ///    })
   ///    .await?;
   /// # Ok(())
   /// # }
   /// ```
   pub async fn with_cursor<T, Fun>(&self, shard_id: i64, f: Fun) -> Result<T>
   where
      Fun: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<T>>,
   {
      let mut conn = self.get_connection(shard_id).await?;
      let result = f(&mut *conn).await;
      self.put_connection(conn);
      result
   }

   /// Close every idle connection in every pool.
   pub async fn disconnect(&self) {
      for pool in &self.pools {
         pool.disconnect().await;
      }
   }

   /// Disconnect, then reset every pool to its freshly built state.
   ///
   /// Connections checked out at this point are discarded when returned.
   pub async fn reinstantiate(&self) {
      self.disconnect().await;
      for pool in &self.pools {
         pool.reinstantiate();
      }
   }

   /// Rebuild every pool in a freshly forked child process.
   pub fn after_fork(&self) {
      for pool in &self.pools {
         pool.after_fork();
      }
   }

   pub fn pools(&self) -> &[ConnectionPool<F>] {
      &self.pools
   }

   pub fn router(&self) -> &ShardRouter {
      &self.router
   }
}

impl<F: ConnectionFactory> std::fmt::Debug for Datastore<F> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Datastore")
         .field("pools", &self.pools)
         .field("router", &self.router)
         .finish()
   }
}
