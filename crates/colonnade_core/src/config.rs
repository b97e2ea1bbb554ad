//! # Storage Configuration
//!
//! Tuning knobs for column growth and block pooling. Loaded once at startup,
//! either from defaults or from a TOML document:
//!
//! ```toml
//! min_column_capacity = 16
//! column_pre_reserve = 32
//! pooled_columns = true
//! pool_max_block_bytes = 4096
//! pool_max_cached_blocks = 64
//! identity_reserve = 0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Smallest capacity (in elements) a column ever grows to.
pub const DEFAULT_MIN_COLUMN_CAPACITY: usize = 16;

/// Capacity reserved on every column of a freshly created archetype.
pub const DEFAULT_COLUMN_PRE_RESERVE: usize = 32;

/// Blocks up to this many bytes are recycled by the per-type pools.
pub const DEFAULT_POOL_MAX_BLOCK_BYTES: usize = 4096;

/// Configuration for a [`crate::World`] / [`crate::ArchetypeRegistry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Minimum capacity of a column after its first growth. Power of two.
    pub min_column_capacity: usize,
    /// Capacity reserved when an archetype's columns are created.
    pub column_pre_reserve: usize,
    /// Share one block pool per attribute type across all archetypes.
    /// When false, every column owns a private pool.
    pub pooled_columns: bool,
    /// Largest block, in bytes, that a pool keeps for reuse.
    pub pool_max_block_bytes: usize,
    /// Maximum cached blocks per size class.
    pub pool_max_cached_blocks: usize,
    /// Identity index slots reserved up front.
    pub identity_reserve: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            min_column_capacity: DEFAULT_MIN_COLUMN_CAPACITY,
            column_pre_reserve: DEFAULT_COLUMN_PRE_RESERVE,
            pooled_columns: true,
            pool_max_block_bytes: DEFAULT_POOL_MAX_BLOCK_BYTES,
            pool_max_cached_blocks: 64,
            identity_reserve: 0,
        }
    }
}

impl StorageConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] on malformed TOML, unknown
    /// keys, or values rejected by [`StorageConfig::validate`].
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| StorageError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if the file cannot be read or
    /// does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StorageError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Serializes the configuration back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if serialization fails.
    pub fn to_toml_string(&self) -> StorageResult<String> {
        toml::to_string(self).map_err(|e| StorageError::InvalidConfig(e.to_string()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> StorageResult<()> {
        if self.min_column_capacity == 0 || !self.min_column_capacity.is_power_of_two() {
            return Err(StorageError::InvalidConfig(format!(
                "min_column_capacity must be a non-zero power of two, got {}",
                self.min_column_capacity
            )));
        }
        if self.pool_max_cached_blocks == 0 {
            return Err(StorageError::InvalidConfig(
                "pool_max_cached_blocks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
