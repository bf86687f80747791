//! Entity storage on PostgreSQL shards
//!
//! Every shard is a schema named `shard` + the zero-padded shard number
//! (`shard0012`) holding one table:
//!
//! ```sql
//! CREATE TABLE shard0012.entities (
//!    id bigint NOT NULL DEFAULT shard0012.next_id(),
//!    type smallint NOT NULL,
//!    body hstore NOT NULL,
//!    updated timestamp,
//!    CONSTRAINT entities_pk PRIMARY KEY (id)
//! );
//! ```
//!
//! `next_id()` mints keys in the layout decoded by [`Key`].

use std::collections::BTreeMap;

use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::postgres::types::PgHstore;
use time::PrimitiveDateTime;

use crate::datastore::Datastore;
use crate::key::{Key, MAX_SHARD_ID};
use crate::{Error, Result};

/// Key-value payload stored in the `body` hstore column
pub type Body = BTreeMap<String, Option<String>>;

/// A row of a shard's `entities` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
   pub key: Key,
   /// Application-defined type discriminant
   pub kind: i16,
   pub body: Body,
   /// Last update time (UTC), `None` if never updated
   pub updated: Option<PrimitiveDateTime>,
}

impl Entity {
   fn from_row(row: &PgRow) -> Result<Self> {
      let id: i64 = row.try_get("id")?;
      let body: PgHstore = row.try_get("body")?;
      Ok(Self {
         key: Key::from(id),
         kind: row.try_get("type")?,
         body: body.0,
         updated: row.try_get("updated")?,
      })
   }
}

/// Schema name of a shard, e.g. `shard0012`
pub fn schema_name(shard_id: u16) -> String {
   format!("shard{shard_id:04}")
}

fn entities_table(shard_id: u16) -> String {
   format!("{}.entities", schema_name(shard_id))
}

/// Shard ids double as schema names and key fields, so they must fit 13 bits.
fn checked_shard(shard_id: i64) -> Result<u16> {
   u16::try_from(shard_id)
      .ok()
      .filter(|shard| *shard <= MAX_SHARD_ID)
      .ok_or(Error::ShardOutOfRange(shard_id))
}

impl Datastore {
   /// Insert an entity on `shard_id` and return its server-generated key.
   pub async fn put(&self, shard_id: i64, kind: i16, body: Body) -> Result<Key> {
      let shard = checked_shard(shard_id)?;
      let sql = format!(
         "INSERT INTO {} (type, body) VALUES ($1, $2) RETURNING id",
         entities_table(shard)
      );

      let mut conn = self.get_connection(shard_id).await?;
      let id: i64 = sqlx::query_scalar(&sql)
         .bind(kind)
         .bind(PgHstore(body))
         .fetch_one(&mut *conn)
         .await?;

      Ok(Key::from(id))
   }

   /// Fetch an entity by key from the shard encoded in the key.
   pub async fn get(&self, key: Key) -> Result<Option<Entity>> {
      let sql = format!(
         "SELECT id, type, body, updated FROM {} WHERE id = $1",
         entities_table(key.shard_id())
      );

      let mut conn = self.get_connection(i64::from(key.shard_id())).await?;
      let row = sqlx::query(&sql)
         .bind(key.id())
         .fetch_optional(&mut *conn)
         .await?;

      row.as_ref().map(Entity::from_row).transpose()
   }

   /// Replace an entity's body and stamp its update time.
   ///
   /// Returns `false` if no entity has this key.
   pub async fn update(&self, key: Key, body: Body) -> Result<bool> {
      let sql = format!(
         "UPDATE {} SET body = $1, updated = (now() AT TIME ZONE 'UTC') WHERE id = $2",
         entities_table(key.shard_id())
      );

      let mut conn = self.get_connection(i64::from(key.shard_id())).await?;
      let result = sqlx::query(&sql)
         .bind(PgHstore(body))
         .bind(key.id())
         .execute(&mut *conn)
         .await?;

      Ok(result.rows_affected() == 1)
   }

   /// Delete an entity. Returns `false` if no entity has this key.
   pub async fn delete(&self, key: Key) -> Result<bool> {
      let sql = format!("DELETE FROM {} WHERE id = $1", entities_table(key.shard_id()));

      let mut conn = self.get_connection(i64::from(key.shard_id())).await?;
      let result = sqlx::query(&sql)
         .bind(key.id())
         .execute(&mut *conn)
         .await?;

      Ok(result.rows_affected() == 1)
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_schema_names_are_zero_padded() {
      assert_eq!(schema_name(12), "shard0012");
      assert_eq!(schema_name(8191), "shard8191");
      assert_eq!(entities_table(5), "shard0005.entities");
   }

   #[test]
   fn test_checked_shard() {
      assert_eq!(checked_shard(0).unwrap(), 0);
      assert_eq!(checked_shard(8191).unwrap(), MAX_SHARD_ID);
      assert!(matches!(checked_shard(8192), Err(Error::ShardOutOfRange(8192))));
      assert!(matches!(checked_shard(-1), Err(Error::ShardOutOfRange(-1))));
   }
}
