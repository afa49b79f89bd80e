//! Partition assignment for new definitions.
//!
//! Every event for a definition's instances is published to the partition
//! chosen here, so assignment happens once at creation and never changes.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Lowest partition assigned by default.
pub const MIN_PARTITION: u32 = 0;

/// Highest partition assigned by default (inclusive).
pub const MAX_PARTITION: u32 = 6;

/// How a partition is chosen for a new definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Uniform random choice over the range.
    #[default]
    Random,
    /// CRC32C of the definition id, reduced into the range.
    Hashed,
}

/// Inclusive partition range `[min, max]`. Always holds `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    min: u32,
    max: u32,
}

impl PartitionRange {
    /// Creates a range, swapping the bounds if given in reverse.
    pub fn new(min: u32, max: u32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of partitions in the range. `0..=u32::MAX` holds 2^32 of them.
    pub fn len(&self) -> u64 {
        u64::from(self.max) - u64::from(self.min) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, partition: u32) -> bool {
        (self.min..=self.max).contains(&partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

impl Default for PartitionRange {
    fn default() -> Self {
        Self::new(MIN_PARTITION, MAX_PARTITION)
    }
}

/// Assigns partitions to new definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionAssignor {
    range: PartitionRange,
    policy: PartitionPolicy,
}

impl PartitionAssignor {
    pub fn new(range: PartitionRange, policy: PartitionPolicy) -> Self {
        Self { range, policy }
    }

    pub fn range(&self) -> PartitionRange {
        self.range
    }

    pub fn policy(&self) -> PartitionPolicy {
        self.policy
    }

    /// Picks a partition for the definition with the given id.
    pub fn assign(&self, definition_id: &str) -> u32 {
        match self.policy {
            PartitionPolicy::Random => {
                rand::thread_rng().gen_range(self.range.min..=self.range.max)
            }
            PartitionPolicy::Hashed => {
                let hash = u64::from(crc32c::crc32c(definition_id.as_bytes()));
                let offset = hash % self.range.len();
                // offset < len, so min + offset <= max
                self.range.min + offset as u32
            }
        }
    }
}
