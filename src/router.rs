//! Shard range table mapping logical shards to physical pools

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::key::MAX_SHARD_ID;
use crate::{Error, Result};

/// Half-open interval `[lo, hi)` of shard ids owned by one pool.
///
/// Written `"lo-hi"` in configuration, e.g. `"1-9"` owns shards 1 through 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardRange {
   lo: i64,
   hi: i64,
}

impl ShardRange {
   /// Create a range, rejecting empty or inverted bounds.
   pub fn new(lo: i64, hi: i64) -> Result<Self> {
      if lo >= hi {
         return Err(Error::InvalidShardRange(format!("{lo}-{hi}")));
      }
      Ok(Self { lo, hi })
   }

   /// First shard id in the range
   pub fn lo(&self) -> i64 {
      self.lo
   }

   /// First shard id past the range
   pub fn hi(&self) -> i64 {
      self.hi
   }

   pub fn contains(&self, shard_id: i64) -> bool {
      self.lo <= shard_id && shard_id < self.hi
   }
}

impl FromStr for ShardRange {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self> {
      let invalid = || Error::InvalidShardRange(s.to_string());
      let (lo, hi) = s.trim().split_once('-').ok_or_else(invalid)?;
      let lo = lo.trim().parse().map_err(|_| invalid())?;
      let hi = hi.trim().parse().map_err(|_| invalid())?;
      Self::new(lo, hi).map_err(|_| invalid())
   }
}

impl TryFrom<String> for ShardRange {
   type Error = Error;

   fn try_from(s: String) -> Result<Self> {
      s.parse()
   }
}

impl From<ShardRange> for String {
   fn from(range: ShardRange) -> Self {
      range.to_string()
   }
}

impl fmt::Display for ShardRange {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}-{}", self.lo, self.hi)
   }
}

/// Resolves a logical shard id to the index of the pool that owns it.
///
/// Ranges are scanned linearly (there are only a handful of physical
/// servers) and results are memoized. Only ids that fit a key's shard
/// field are cached, so the cache holds at most 8192 entries.
#[derive(Debug)]
pub struct ShardRouter {
   ranges: Vec<ShardRange>,
   cache: RwLock<HashMap<i64, Option<usize>>>,
}

impl ShardRouter {
   /// Build a router over ranges given in pool order.
   ///
   /// Ranges must be non-empty, ascending and non-overlapping. Gaps are
   /// allowed; ids falling in one are unroutable.
   pub fn new<I>(ranges: I) -> Result<Self>
   where
      I: IntoIterator<Item = ShardRange>,
   {
      let ranges: Vec<ShardRange> = ranges.into_iter().collect();
      if ranges.is_empty() {
         return Err(Error::NoShardRanges);
      }

      for pair in ranges.windows(2) {
         if pair[1].lo < pair[0].hi {
            return Err(Error::OverlappingShardRanges {
               previous: pair[0].to_string(),
               current: pair[1].to_string(),
            });
         }
      }

      Ok(Self {
         ranges,
         cache: RwLock::new(HashMap::new()),
      })
   }

   /// Build a router from flat boundaries `[lo_0, hi_0, lo_1, hi_1, ...]`.
   pub fn from_bounds(bounds: &[i64]) -> Result<Self> {
      if bounds.len() % 2 != 0 {
         return Err(Error::InvalidShardRange(format!("{bounds:?}")));
      }

      let ranges = bounds
         .chunks_exact(2)
         .map(|pair| ShardRange::new(pair[0], pair[1]))
         .collect::<Result<Vec<_>>>()?;
      Self::new(ranges)
   }

   /// Index of the pool owning `shard_id`, or `None` if no range covers it.
   pub fn resolve(&self, shard_id: i64) -> Option<usize> {
      if !(0..=i64::from(MAX_SHARD_ID)).contains(&shard_id) {
         return self.scan(shard_id);
      }

      if let Some(hit) = self.cache.read().get(&shard_id) {
         return *hit;
      }

      let pool_id = self.scan(shard_id);
      self.cache.write().insert(shard_id, pool_id);
      pool_id
   }

   fn scan(&self, shard_id: i64) -> Option<usize> {
      self.ranges.iter().position(|range| range.contains(shard_id))
   }

   /// Configured ranges, in pool order
   pub fn ranges(&self) -> &[ShardRange] {
      &self.ranges
   }

   /// Number of memoized lookups
   pub fn cached_entries(&self) -> usize {
      self.cache.read().len()
   }
}
