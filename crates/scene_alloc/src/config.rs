//! # Allocator Configuration
//!
//! Block sizes, alignment and tracking flags, loaded once at startup.
//!
//! ## Example
//!
//! ```toml
//! default_alignment = 8
//!
//! [pools.nodes]
//! block_size = 2097152
//!
//! [pools.data]
//! block_size = 16777216
//! max_allocation_size = 1048576
//!
//! [tracking]
//! report_actions = false
//! check_actions = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::affinity::Affinity;
use crate::block::MemoryBlock;
use crate::error::{AllocError, AllocResult};

/// One kibibyte.
pub const KIB: usize = 1024;

/// One mebibyte.
pub const MIB: usize = 1024 * KIB;

/// Default payload alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Default arena size for each affinity.
#[must_use]
pub const fn default_block_size(affinity: Affinity) -> usize {
    match affinity {
        Affinity::Objects | Affinity::Nodes | Affinity::Commands => MIB,
        Affinity::Data => 16 * MIB,
    }
}

/// Settings of one block pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Arena size for new blocks in bytes.
    pub block_size: usize,
    /// Payload alignment; falls back to the allocator default.
    #[serde(default)]
    pub alignment: Option<usize>,
    /// Largest request served by the slab path. Defaults to what one block
    /// of `block_size` can hold; larger values make the pool create
    /// oversized blocks for big requests.
    #[serde(default)]
    pub max_allocation_size: Option<usize>,
}

impl PoolConfig {
    /// Pool with the given block size and default alignment.
    #[must_use]
    pub const fn with_block_size(block_size: usize) -> Self {
        Self {
            block_size,
            alignment: None,
            max_allocation_size: None,
        }
    }
}

/// Debug switches for allocation tracking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryTracking {
    /// Log every allocate/deallocate at debug level.
    pub report_actions: bool,
    /// Validate the touched pool after every allocate/deallocate.
    pub check_actions: bool,
}

/// Complete allocator configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllocatorConfig {
    /// Alignment used by pools that do not set their own.
    pub default_alignment: usize,
    /// Per-affinity overrides; missing affinities use [`default_block_size`].
    pub pools: BTreeMap<Affinity, PoolConfig>,
    /// Tracking switches.
    pub tracking: MemoryTracking,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            default_alignment: DEFAULT_ALIGNMENT,
            pools: BTreeMap::new(),
            tracking: MemoryTracking::default(),
        }
    }
}

impl AllocatorConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the document does not parse or fails [`Self::validate`].
    pub fn from_toml_str(source: &str) -> AllocResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| AllocError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> AllocResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            AllocError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Sets the pool configuration of one affinity.
    #[must_use]
    pub fn with_pool(mut self, affinity: Affinity, pool: PoolConfig) -> Self {
        self.pools.insert(affinity, pool);
        self
    }

    /// Effective pool configuration for `affinity`.
    #[must_use]
    pub fn pool(&self, affinity: Affinity) -> PoolConfig {
        let mut pool = self
            .pools
            .get(&affinity)
            .copied()
            .unwrap_or_else(|| PoolConfig::with_block_size(default_block_size(affinity)));
        pool.alignment.get_or_insert(self.default_alignment);
        pool
    }

    /// Checks alignment and block geometry of every pool.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the first offending setting, `BlockTooLarge`
    /// for a block size slot headers cannot address.
    pub fn validate(&self) -> AllocResult<()> {
        if !self.default_alignment.is_power_of_two() {
            return Err(AllocError::InvalidConfig(format!(
                "default_alignment {} is not a power of two",
                self.default_alignment
            )));
        }
        for affinity in Affinity::ALL {
            let pool = self.pool(affinity);
            let alignment = pool.alignment.unwrap_or(self.default_alignment);
            MemoryBlock::check_geometry(pool.block_size, alignment).map_err(|e| match e {
                AllocError::InvalidConfig(reason) => {
                    AllocError::InvalidConfig(format!("{affinity} pool: {reason}"))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AllocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool(Affinity::Data).block_size, 16 * MIB);
        assert_eq!(config.pool(Affinity::Nodes).alignment, Some(DEFAULT_ALIGNMENT));
    }

    #[test]
    fn test_parse_toml() {
        let config = AllocatorConfig::from_toml_str(
            r#"
            default_alignment = 16

            [pools.nodes]
            block_size = 65536

            [pools.data]
            block_size = 1048576
            alignment = 64
            max_allocation_size = 4096

            [tracking]
            check_actions = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pool(Affinity::Nodes).block_size, 65536);
        assert_eq!(config.pool(Affinity::Nodes).alignment, Some(16));
        assert_eq!(config.pool(Affinity::Data).alignment, Some(64));
        assert_eq!(config.pool(Affinity::Data).max_allocation_size, Some(4096));
        assert_eq!(config.pool(Affinity::Objects).block_size, MIB);
        assert!(config.tracking.check_actions);
        assert!(!config.tracking.report_actions);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AllocatorConfig::from_toml_str("default_alignment = 12").is_err());
        assert!(AllocatorConfig::from_toml_str("[pools.nodes]\nblock_size = 8").is_err());
        assert!(AllocatorConfig::from_toml_str("[pools.meshes]\nblock_size = 4096").is_err());
        assert!(AllocatorConfig::from_toml_str("unknown = 1").is_err());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_rejects_block_size_beyond_header_limit() {
        let result = AllocatorConfig::from_toml_str("[pools.objects]\nblock_size = 34359738368");
        assert!(matches!(result, Err(AllocError::BlockTooLarge { .. })));

        let config = AllocatorConfig::default()
            .with_pool(Affinity::Nodes, PoolConfig::with_block_size(1 << 35));
        assert!(matches!(config.validate(), Err(AllocError::BlockTooLarge { .. })));
    }
}
