//! # Allocation Affinity
//!
//! Category tags that group similar objects into their own block pool.

use std::fmt;

use serde::Deserialize;

/// Category of an allocation.
///
/// Each affinity maps to exactly one independent block pool, so objects of
/// the same kind end up packed next to each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Affinity {
    /// General engine objects (state, visitors, small helpers).
    Objects,
    /// Scene-graph nodes (groups, transforms, state groups).
    Nodes,
    /// Arrays and other bulk data owned by nodes.
    Data,
    /// Recorded render commands.
    Commands,
}

impl Affinity {
    /// Number of affinities.
    pub const COUNT: usize = 4;

    /// All affinities in pool order.
    pub const ALL: [Affinity; Self::COUNT] = [
        Affinity::Objects,
        Affinity::Nodes,
        Affinity::Data,
        Affinity::Commands,
    ];

    /// Index of this affinity's pool.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name used in reports and config files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Affinity::Objects => "objects",
            Affinity::Nodes => "nodes",
            Affinity::Data => "data",
            Affinity::Commands => "commands",
        }
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_match_pool_order() {
        for (i, affinity) in Affinity::ALL.iter().enumerate() {
            assert_eq!(affinity.index(), i);
        }
    }

    #[test]
    fn test_display_uses_config_name() {
        assert_eq!(Affinity::Nodes.to_string(), "nodes");
        assert_eq!(Affinity::Commands.to_string(), "commands");
    }
}
