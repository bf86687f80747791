//! PostgreSQL connection factory

use hypervault_pool::ConnectionFactory;
use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, warn};

use crate::config::ShardConnectionConfig;

/// Session settings applied to every new connection.
///
/// sqlx already requests UTF-8 and UTC in its startup packet; setting them
/// again keeps sessions consistent behind poolers that drop startup options.
const SESSION_SETUP: [&str; 2] = ["SET client_encoding TO 'UTF8'", "SET TIME ZONE 'UTC'"];

/// Opens connections to one physical PostgreSQL server.
///
/// Connections run in autocommit mode: sqlx only opens a transaction when
/// one is begun explicitly, so every statement commits on its own. The
/// `hstore` type used by entity bodies is resolved by name on first use.
#[derive(Debug, Clone)]
pub struct PgConnector {
   options: PgConnectOptions,
}

impl PgConnector {
   /// Build a connector from a shard connection config.
   ///
   /// With `log_statements`, every statement is logged through the `log`
   /// facade at debug level; otherwise statement logging is off.
   pub fn new(config: &ShardConnectionConfig, log_statements: bool) -> Self {
      let mut options = PgConnectOptions::new()
         .port(config.port)
         .username(&config.user)
         .database(&config.database);

      if let Some(host) = config.host.as_deref().filter(|h| !h.is_empty()) {
         options = options.host(host);
      }
      if let Some(password) = &config.password {
         options = options.password(password);
      }

      options = if log_statements {
         options.log_statements(LevelFilter::Debug)
      } else {
         options.disable_statement_logging()
      };

      Self { options }
   }

   /// Use fully custom connect options
   pub fn from_options(options: PgConnectOptions) -> Self {
      Self { options }
   }

   pub fn options(&self) -> &PgConnectOptions {
      &self.options
   }
}

impl ConnectionFactory for PgConnector {
   type Connection = PgConnection;
   type Error = sqlx::Error;

   async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
      let mut conn = self.options.connect().await?;
      for statement in SESSION_SETUP {
         sqlx::query(statement).execute(&mut conn).await?;
      }

      debug!(
         host = self.options.get_host(),
         database = ?self.options.get_database(),
         "Connected to PostgreSQL"
      );
      Ok(conn)
   }

   async fn close(&self, conn: PgConnection) {
      if let Err(e) = conn.close().await {
         warn!(error = %e, "Failed to close PostgreSQL connection cleanly");
      }
   }
}
