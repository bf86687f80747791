//! Configuration for connection pools

use std::time::Duration;

/// Configuration for a [`ConnectionPool`](crate::ConnectionPool)
///
/// # Examples
///
/// ```
/// use hypervault_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just one field
/// let config = PoolConfig {
///     max_connections: 3,
///     ..Default::default()
/// };
/// assert_eq!(config.block_timeout, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
   /// Number of slots in the pool, i.e. the most connections that may be
   /// checked out at once. Must be positive.
   ///
   /// Default: 10
   pub max_connections: usize,

   /// How long `get_connection` waits for a free slot before failing
   ///
   /// Default: 5 seconds
   pub block_timeout: Duration,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         max_connections: 10,
         block_timeout: Duration::from_secs(5),
      }
   }
}
