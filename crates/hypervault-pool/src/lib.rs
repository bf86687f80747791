//! # hypervault-pool
//!
//! A bounded connection pool for one physical database server, used by
//! `hypervault` to hand out connections per shard-owning server.
//!
//! ## Core Types
//!
//! - **[`ConnectionPool`]**: Thread-safe LIFO pool with lazy connection creation
//! - **[`PoolConfig`]**: Capacity and acquisition timeout
//! - **[`ConnectionFactory`]**: Opens and closes physical connections for a pool
//! - **[`PooledConnection`]**: RAII guard returning its connection to the pool on drop
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Slots**: The pool owns `max_connections` slots. A slot is either empty
//!   (no physical connection yet) or holds a ready connection.
//! - **LIFO**: The most recently returned slot is handed out first, keeping a
//!   small set of connections warm under moderate load.
//! - **Lazy creation**: A physical connection is opened by whichever caller
//!   first draws an empty slot.
//! - **Bounded waits**: Acquisition waits at most `block_timeout`, then fails
//!   with [`Error::ConnectionUnavailable`].
//! - **Fork safety**: State inherited by a forked child is discarded and
//!   rebuilt before it is used.

mod config;
mod error;
mod factory;
mod guard;
mod pool;

// Re-export public types
pub use config::PoolConfig;
pub use error::{BoxDynError, Error, Result};
pub use factory::ConnectionFactory;
pub use guard::PooledConnection;
pub use pool::ConnectionPool;
