//! Configuration for a sharded datastore

use std::time::Duration;

use hypervault_pool::PoolConfig;
use serde::{Deserialize, Deserializer};

use crate::router::ShardRange;

/// Connection parameters for one physical server and the shards it owns.
///
/// Deserializes from records like:
///
/// ```json
/// { "shards": "1-9", "host": "db1.internal", "user": "hv", "password": "x", "database": "hv" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShardConnectionConfig {
   /// Half-open range of logical shards hosted on this server
   pub shards: ShardRange,

   /// Server host name. `None` or empty uses the libpq defaults (`PGHOST`,
   /// then the local socket/localhost).
   #[serde(default)]
   pub host: Option<String>,

   /// Default: 5432
   #[serde(default = "default_port")]
   pub port: u16,

   pub user: String,

   #[serde(default)]
   pub password: Option<String>,

   pub database: String,
}

/// Configuration for [`Datastore`](crate::Datastore)
///
/// # Examples
///
/// ```
/// use hypervault::{DatastoreConfig, ShardConnectionConfig};
/// use std::time::Duration;
///
/// let config = DatastoreConfig {
///     connections: vec![ShardConnectionConfig {
///         shards: "1-9".parse().unwrap(),
///         host: Some("localhost".into()),
///         port: 5432,
///         user: "hv".into(),
///         password: None,
///         database: "hvtest".into(),
///     }],
///     pool_block_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert_eq!(config.pool_config().max_connections, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatastoreConfig {
   /// One entry per physical server, in pool order
   pub connections: Vec<ShardConnectionConfig>,

   /// Connections kept per pool
   ///
   /// Default: 10
   #[serde(default = "default_pool_max")]
   pub pool_max: usize,

   /// How long to wait for a pooled connection before failing. Given in
   /// seconds (fractions allowed) when deserialized.
   ///
   /// Default: 5 seconds
   #[serde(default = "default_block_timeout", deserialize_with = "deserialize_secs")]
   pub pool_block_timeout: Duration,

   /// Log every SQL statement through the `log` facade at debug level
   ///
   /// Default: false
   #[serde(default)]
   pub log_statements: bool,
}

impl DatastoreConfig {
   /// Pool settings shared by every server
   pub fn pool_config(&self) -> PoolConfig {
      PoolConfig {
         max_connections: self.pool_max,
         block_timeout: self.pool_block_timeout,
      }
   }
}

impl Default for DatastoreConfig {
   fn default() -> Self {
      Self {
         connections: Vec::new(),
         pool_max: default_pool_max(),
         pool_block_timeout: default_block_timeout(),
         log_statements: false,
      }
   }
}

fn default_port() -> u16 {
   5432
}

fn default_pool_max() -> usize {
   PoolConfig::default().max_connections
}

fn default_block_timeout() -> Duration {
   PoolConfig::default().block_timeout
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
   D: Deserializer<'de>,
{
   let secs = f64::deserialize(deserializer)?;
   Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::json;

   #[test]
   fn test_deserialize_with_defaults() {
      let config: DatastoreConfig = serde_json::from_value(json!({
         "connections": [
            { "shards": "1-9", "host": "", "user": "x", "password": "x", "database": "hvtest" },
            { "shards": "9-17", "host": "192.168.2.24", "port": 5433, "user": "x", "database": "hvtest" }
         ]
      }))
      .unwrap();

      assert_eq!(config.connections.len(), 2);
      assert_eq!(config.connections[0].shards, ShardRange::new(1, 9).unwrap());
      assert_eq!(config.connections[0].port, 5432);
      assert_eq!(config.connections[1].port, 5433);
      assert_eq!(config.connections[1].password, None);
      assert_eq!(config.pool_max, 10);
      assert_eq!(config.pool_block_timeout, Duration::from_secs(5));
      assert!(!config.log_statements);
   }

   #[test]
   fn test_deserialize_pool_settings() {
      let config: DatastoreConfig = serde_json::from_value(json!({
         "connections": [],
         "pool_max": 3,
         "pool_block_timeout": 0.5,
         "log_statements": true
      }))
      .unwrap();

      let pool = config.pool_config();
      assert_eq!(pool.max_connections, 3);
      assert_eq!(pool.block_timeout, Duration::from_millis(500));
      assert!(config.log_statements);
   }

   #[test]
   fn test_deserialize_rejects_bad_values() {
      let bad_range = serde_json::from_value::<ShardConnectionConfig>(json!({
         "shards": "9-1", "user": "x", "database": "hvtest"
      }));
      assert!(bad_range.is_err());

      let bad_timeout = serde_json::from_value::<DatastoreConfig>(json!({
         "connections": [],
         "pool_block_timeout": -1
      }));
      assert!(bad_timeout.is_err());
   }
}
