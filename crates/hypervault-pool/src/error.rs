//! Error types for hypervault-pool

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by a [`ConnectionFactory`](crate::ConnectionFactory).
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that may occur when working with a connection pool
#[derive(Error, Debug)]
pub enum Error {
   /// No slot became available before the block timeout elapsed.
   ///
   /// The failed attempt leaves the pool untouched; callers decide whether to retry.
   #[error("no connection available within {timeout:?}")]
   ConnectionUnavailable { timeout: Duration },

   /// The pool was configured with zero connections
   #[error("max_connections must be a positive integer")]
   InvalidCapacity,

   /// The connection factory failed to open a physical connection
   #[error("failed to open connection: {0}")]
   Connect(#[source] BoxDynError),
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
