/// Result type alias for datastore operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for datastore operations.
///
/// Misuse of the API (unroutable shards, bad configuration) is reported
/// directly; pool errors, including
/// [`ConnectionUnavailable`](hypervault_pool::Error::ConnectionUnavailable),
/// are wrapped in [`Error::Pool`] untouched. Nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// No configured shard range covers the shard id.
   #[error("shard {0} is not covered by any configured shard range")]
   UnroutableShard(i64),

   /// Shard id cannot be encoded in the 13-bit shard field of a key.
   #[error("shard {0} is outside the key shard space 0..=8191")]
   ShardOutOfRange(i64),

   /// Shard range descriptor is malformed or empty.
   #[error("invalid shard range '{0}': expected 'lo-hi' with lo < hi")]
   InvalidShardRange(String),

   /// Shard ranges overlap or are not in ascending order.
   #[error("shard range {current} overlaps or precedes {previous}")]
   OverlappingShardRanges { previous: String, current: String },

   /// The datastore was configured without any pools.
   #[error("at least one shard range must be configured")]
   NoShardRanges,

   /// Error from a connection pool.
   #[error(transparent)]
   Pool(#[from] hypervault_pool::Error),

   /// Error from SQLx operations.
   #[error(transparent)]
   Sqlx(#[from] sqlx::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::UnroutableShard(_) => "UNROUTABLE_SHARD".to_string(),
         Error::ShardOutOfRange(_) => "SHARD_OUT_OF_RANGE".to_string(),
         Error::InvalidShardRange(_) => "INVALID_SHARD_RANGE".to_string(),
         Error::OverlappingShardRanges { .. } => "OVERLAPPING_SHARD_RANGES".to_string(),
         Error::NoShardRanges => "NO_SHARD_RANGES".to_string(),
         Error::Pool(hypervault_pool::Error::ConnectionUnavailable { .. }) => {
            "CONNECTION_UNAVAILABLE".to_string()
         }
         Error::Pool(hypervault_pool::Error::InvalidCapacity) => "INVALID_POOL_CAPACITY".to_string(),
         Error::Pool(hypervault_pool::Error::Connect(_)) => "CONNECTION_ERROR".to_string(),
         Error::Sqlx(e) => {
            if let Some(code) = e.as_database_error().and_then(|db_err| db_err.code()) {
               return format!("PG_{}", code);
            }
            "SQLX_ERROR".to_string()
         }
      }
   }

   /// True when a pool had no connection to hand out before its block timeout.
   ///
   /// This is the one error callers typically retry on.
   pub fn is_connection_unavailable(&self) -> bool {
      matches!(
         self,
         Error::Pool(hypervault_pool::Error::ConnectionUnavailable { .. })
      )
   }
}
