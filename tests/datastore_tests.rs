//! Facade tests: routing, scoped connections and pool fan-out, using an
//! in-memory connection factory.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use hypervault::{
   ConnectionFactory, Datastore, DatastoreConfig, Error, PoolConfig, ShardConnectionConfig,
   ShardRange,
};

struct FakeConnection {
   server: usize,
   statements: Vec<String>,
}

struct FakeServer {
   index: usize,
   opened: Arc<AtomicUsize>,
}

impl ConnectionFactory for FakeServer {
   type Connection = FakeConnection;
   type Error = std::io::Error;

   async fn connect(&self) -> Result<FakeConnection, std::io::Error> {
      self.opened.fetch_add(1, Ordering::SeqCst);
      Ok(FakeConnection {
         server: self.index,
         statements: Vec::new(),
      })
   }

   async fn close(&self, _conn: FakeConnection) {}
}

fn fake_datastore(pool_max: usize) -> (Datastore<FakeServer>, Arc<AtomicUsize>) {
   let opened = Arc::new(AtomicUsize::new(0));
   let entries = [("1-9", 0), ("9-17", 1)].map(|(range, index)| {
      let factory = FakeServer {
         index,
         opened: Arc::clone(&opened),
      };
      (range.parse::<ShardRange>().unwrap(), factory)
   });
   let config = PoolConfig {
      max_connections: pool_max,
      block_timeout: Duration::from_millis(50),
   };
   (Datastore::with_factories(entries, config).unwrap(), opened)
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_connections_come_from_owning_pool() {
   let (db, _opened) = fake_datastore(2);

   let low = db.get_connection(5).await.unwrap();
   assert_eq!(low.pool_id(), 0);
   assert_eq!(low.server, 0);

   let high = db.get_connection(12).await.unwrap();
   assert_eq!(high.pool_id(), 1);
   assert_eq!(high.server, 1);

   let err = db.get_connection(20).await.unwrap_err();
   assert!(matches!(err, Error::UnroutableShard(20)));
}

#[tokio::test]
async fn test_put_connection_routes_back_to_owner() {
   let (db, _opened) = fake_datastore(2);

   let conn = db.get_connection(12).await.unwrap();
   assert!(!db.pools()[1].is_full());

   db.put_connection(conn);
   assert!(db.pools()[1].is_full());
   assert!(db.pools()[0].is_full());
   assert_eq!(db.pools()[1].live_connections(), 1);
}

// ============================================================================
// Scoped connections
// ============================================================================

#[tokio::test]
async fn test_with_cursor_releases_on_success() {
   let (db, _opened) = fake_datastore(2);

   let server = db
      .with_cursor(5, |conn| {
         Box::pin(async move {
            conn.statements.push("SELECT version()".into());
            Ok(conn.server)
         })
      })
      .await
      .unwrap();

   assert_eq!(server, 0);
   assert!(db.pools()[0].is_full());
   assert_eq!(db.pools()[0].live_connections(), 1);

   // Same physical connection comes back on the next checkout
   let conn = db.get_connection(3).await.unwrap();
   assert_eq!(conn.statements, vec!["SELECT version()".to_string()]);
}

#[tokio::test]
async fn test_with_cursor_releases_on_error() {
   let (db, _opened) = fake_datastore(2);

   let result: hypervault::Result<()> = db
      .with_cursor(12, |_conn| {
         Box::pin(async move { Err(Error::Sqlx(sqlx::Error::RowNotFound)) })
      })
      .await;

   assert!(matches!(result, Err(Error::Sqlx(sqlx::Error::RowNotFound))));
   assert!(db.pools()[1].is_full());
   assert_eq!(db.pools()[1].checked_out(), 0);
}

#[tokio::test]
async fn test_with_cursor_releases_on_panic() {
   let (db, _opened) = fake_datastore(2);

   let outcome = AssertUnwindSafe(db.with_cursor(12, |conn| {
      Box::pin(async move {
         if conn.server == 1 {
            panic!("boom");
         }
         Ok(())
      })
   }))
   .catch_unwind()
   .await;

   assert!(outcome.is_err());
   assert!(db.pools()[1].is_full());
   assert_eq!(db.pools()[1].checked_out(), 0);
}

#[tokio::test]
async fn test_cursor_guard_returns_on_scope_exit() {
   let (db, opened) = fake_datastore(2);

   async fn record(db: &Datastore<FakeServer>, fail: bool) -> hypervault::Result<usize> {
      let mut conn = db.cursor(14).await?;
      conn.statements.push("SELECT 1".into());
      if fail {
         return Err(Error::Sqlx(sqlx::Error::RowNotFound));
      }
      Ok(conn.server)
   }

   {
      let conn = db.cursor(14).await.unwrap();
      assert_eq!(conn.pool_id(), 1);
      assert_eq!(db.pools()[1].checked_out(), 1);
   }
   assert!(db.pools()[1].is_full());

   assert_eq!(record(&db, false).await.unwrap(), 1);
   assert!(record(&db, true).await.is_err());
   assert!(db.pools()[1].is_full());
   assert_eq!(db.pools()[1].checked_out(), 0);

   // One physical connection served every scope
   assert_eq!(opened.load(Ordering::SeqCst), 1);
   let conn = db.cursor(9).await.unwrap();
   assert_eq!(conn.statements.len(), 2);

   assert!(matches!(db.cursor(30).await, Err(Error::UnroutableShard(30))));
}

#[tokio::test]
async fn test_with_cursor_unroutable_opens_nothing() {
   let (db, opened) = fake_datastore(2);

   let result = db
      .with_cursor(40, |conn| Box::pin(async move { Ok(conn.server) }))
      .await;

   assert!(matches!(result, Err(Error::UnroutableShard(40))));
   assert_eq!(opened.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Pool exhaustion and lifecycle
// ============================================================================

#[tokio::test]
async fn test_exhausted_pool_surfaces_connection_unavailable() {
   let (db, _opened) = fake_datastore(1);

   let held = db.get_connection(2).await.unwrap();
   let err = db.get_connection(3).await.unwrap_err();
   assert!(err.is_connection_unavailable());
   assert_eq!(err.error_code(), "CONNECTION_UNAVAILABLE");

   // The other server is unaffected
   let other = db.get_connection(10).await.unwrap();
   assert_eq!(other.pool_id(), 1);

   drop(held);
   assert!(db.get_connection(3).await.is_ok());
}

#[tokio::test]
async fn test_disconnect_and_reinstantiate_fan_out() {
   let (db, opened) = fake_datastore(2);

   drop(db.get_connection(1).await.unwrap());
   drop(db.get_connection(9).await.unwrap());
   assert_eq!(opened.load(Ordering::SeqCst), 2);

   db.disconnect().await;
   for pool in db.pools() {
      assert_eq!(pool.live_connections(), 0);
      assert!(pool.is_full());
   }

   let outstanding = db.get_connection(16).await.unwrap();
   db.reinstantiate().await;
   for pool in db.pools() {
      assert!(pool.is_full());
      assert_eq!(pool.live_connections(), 0);
      assert_eq!(pool.max_connections(), 2);
   }

   db.put_connection(outstanding);
   assert_eq!(db.pools()[1].idle_slots(), 2);
}

#[tokio::test]
async fn test_after_fork_resets_every_pool() {
   let (db, _opened) = fake_datastore(2);

   drop(db.get_connection(4).await.unwrap());
   drop(db.get_connection(14).await.unwrap());

   db.after_fork();
   for pool in db.pools() {
      assert_eq!(pool.live_connections(), 0);
      assert!(pool.is_full());
   }
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_invalid_construction_fails_fast() {
   let server = |index| FakeServer {
      index,
      opened: Arc::new(AtomicUsize::new(0)),
   };

   let err = Datastore::with_factories(
      [(ShardRange::new(1, 9).unwrap(), server(0))],
      PoolConfig {
         max_connections: 0,
         ..Default::default()
      },
   )
   .unwrap_err();
   assert!(matches!(err, Error::Pool(hypervault_pool::Error::InvalidCapacity)));

   let err = Datastore::with_factories(
      [
         (ShardRange::new(1, 9).unwrap(), server(0)),
         (ShardRange::new(8, 17).unwrap(), server(1)),
      ],
      PoolConfig::default(),
   )
   .unwrap_err();
   assert!(matches!(err, Error::OverlappingShardRanges { .. }));

   let err = Datastore::<FakeServer>::with_factories([], PoolConfig::default()).unwrap_err();
   assert!(matches!(err, Error::NoShardRanges));
}

#[test]
fn test_postgres_datastore_builds_without_connecting() {
   let connection = |shards: &str| ShardConnectionConfig {
      shards: shards.parse().unwrap(),
      host: Some("127.0.0.1".into()),
      port: 5432,
      user: "hv".into(),
      password: Some("secret".into()),
      database: "hvtest".into(),
   };
   let config = DatastoreConfig {
      connections: vec![connection("1-9"), connection("9-17")],
      pool_max: 3,
      ..Default::default()
   };

   let db = Datastore::new(&config).unwrap();
   assert_eq!(db.pools().len(), 2);
   assert_eq!(db.router().resolve(5), Some(0));
   assert_eq!(db.router().resolve(12), Some(1));
   assert_eq!(db.router().resolve(20), None);
   for pool in db.pools() {
      assert_eq!(pool.max_connections(), 3);
      assert_eq!(pool.live_connections(), 0);
   }
}
