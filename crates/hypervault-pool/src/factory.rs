//! Connection factory trait implemented by database backends

use std::future::Future;

/// Opens and closes the physical connections held by a pool.
///
/// `connect` must return a connection that is fully configured for use
/// (session settings applied), since the pool hands it to callers as is.
pub trait ConnectionFactory: Send + Sync + 'static {
   /// The physical connection type
   type Connection: Send + 'static;

   /// Error returned when a connection cannot be opened
   type Error: std::error::Error + Send + Sync + 'static;

   /// Open and configure a new physical connection
   fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;

   /// Gracefully close a connection
   fn close(&self, conn: Self::Connection) -> impl Future<Output = ()> + Send;
}
