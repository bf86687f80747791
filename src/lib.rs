//! # hypervault
//!
//! Shard-aware, pooled access to a PostgreSQL deployment whose logical shards
//! are schemas spread over several physical servers.
//!
//! ## Core Types
//!
//! - **[`Datastore`]**: Routes a shard to its server's pool and hands out connections
//! - **[`ShardRouter`]**: Maps shard ids to pool indices over half-open [`ShardRange`]s
//! - **[`Key`]**: Decodes the 64-bit, time-ordered, shard-aware entity keys
//! - **[`DatastoreConfig`]**: Per-server connection parameters and pool settings
//! - **[`Error`]**: Error type for datastore operations
//!
//! ## Example
//!
//! ```no_run
//! use hypervault::{Body, Datastore, DatastoreConfig};
//!
//! # async fn example(config: DatastoreConfig) -> hypervault::Result<()> {
//! let db = Datastore::new(&config)?;
//!
//! let mut body = Body::new();
//! body.insert("beep".into(), Some("boop".into()));
//!
//! let key = db.put(12, 1, body).await?;
//! assert_eq!(key.shard_id(), 12);
//!
//! let entity = db.get(key).await?.expect("just inserted");
//! assert_eq!(entity.body["beep"].as_deref(), Some("boop"));
//!
//! db.disconnect().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod connector;
mod datastore;
mod entity;
mod error;
mod key;
mod router;

pub use config::{DatastoreConfig, ShardConnectionConfig};
pub use connector::PgConnector;
pub use datastore::Datastore;
pub use entity::{Body, Entity, schema_name};
pub use error::{Error, Result};
pub use key::{KEY_EPOCH_MS, Key, MAX_SEQUENCE, MAX_SHARD_ID};
pub use router::{ShardRange, ShardRouter};

// Pool types appear in the public API
pub use hypervault_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PooledConnection};
