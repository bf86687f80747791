//! Shard-aware, time-ordered 64-bit entity keys
//!
//! Layout, most significant bits first:
//!
//! ```text
//! | 41 bits: ms since KEY_EPOCH_MS | 13 bits: shard id | 10 bits: sequence |
//! ```
//!
//! Keys are minted by the `next_id()` function installed in every shard
//! schema; this module only decodes them, and must stay bit-for-bit in step
//! with that function.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reference point of the 41-bit time field, in Unix milliseconds (2013-09-16T21:05:31.352Z)
pub const KEY_EPOCH_MS: i64 = 1_379_365_531_352;

/// Largest shard id the 13-bit shard field can hold
pub const MAX_SHARD_ID: u16 = (1 << SHARD_BITS) - 1;

/// Largest per-millisecond, per-shard sequence number
pub const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

const TIME_BITS: u32 = 41;
const SHARD_BITS: u32 = 13;
const SEQUENCE_BITS: u32 = 10;
const TIME_SHIFT: u32 = SHARD_BITS + SEQUENCE_BITS;

/// A decoded entity key.
///
/// Serializes as the raw integer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct Key {
   id: i64,
   created: OffsetDateTime,
   shard_id: u16,
   sequence: u16,
}

impl Key {
   /// Decode a raw 64-bit key. Total: every input yields a key.
   pub fn decode(raw: u64) -> Self {
      let offset_ms = (raw >> TIME_SHIFT) as i64;
      let created =
         OffsetDateTime::UNIX_EPOCH + time::Duration::milliseconds(KEY_EPOCH_MS + offset_ms);

      Self {
         id: raw as i64,
         created,
         shard_id: ((raw & ((1 << TIME_SHIFT) - 1)) >> SEQUENCE_BITS) as u16,
         sequence: (raw & u64::from(MAX_SEQUENCE)) as u16,
      }
   }

   /// Pack the three fields into a key, truncating each to its width.
   ///
   /// `offset_ms` is measured from [`KEY_EPOCH_MS`].
   pub fn from_parts(offset_ms: u64, shard_id: u16, sequence: u16) -> Self {
      let time = offset_ms & ((1 << TIME_BITS) - 1);
      let shard = u64::from(shard_id & MAX_SHARD_ID);
      let sequence = u64::from(sequence & MAX_SEQUENCE);
      Self::decode((time << TIME_SHIFT) | (shard << SEQUENCE_BITS) | sequence)
   }

   /// The raw key, as stored in the `id bigint` column
   pub fn id(&self) -> i64 {
      self.id
   }

   /// When the key was minted (UTC, millisecond precision)
   pub fn created(&self) -> OffsetDateTime {
      self.created
   }

   /// Milliseconds between [`KEY_EPOCH_MS`] and when the key was minted
   pub fn created_offset_ms(&self) -> u64 {
      (self.id as u64) >> TIME_SHIFT
   }

   /// Logical shard the entity lives on
   pub fn shard_id(&self) -> u16 {
      self.shard_id
   }

   /// Sequence number within the minting millisecond and shard
   pub fn sequence(&self) -> u16 {
      self.sequence
   }
}

impl From<u64> for Key {
   fn from(raw: u64) -> Self {
      Self::decode(raw)
   }
}

impl From<i64> for Key {
   fn from(id: i64) -> Self {
      Self::decode(id as u64)
   }
}

impl From<Key> for i64 {
   fn from(key: Key) -> Self {
      key.id
   }
}

impl fmt::Display for Key {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}", self.id)
   }
}
