//! # Substrate Configuration
//!
//! Block sizes and growth granularities, loaded once at startup from TOML.
//!
//! ```toml
//! [pool]
//! small_block_size = 65536
//! large_block_size = 16777216
//! small_granularity = 8
//! large_granularity = 2
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};
use crate::memory::{align::is_multiple, ALIGNMENT};

/// Nominal small block payload ("64K").
pub const DEFAULT_SMALL_BLOCK_SIZE: usize = 64 * 1024;

/// Nominal large block payload ("16M").
pub const DEFAULT_LARGE_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Block pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Payload bytes of a small block. Multiple of [`ALIGNMENT`].
    pub small_block_size: usize,
    /// Payload bytes of a large block. Multiple of [`ALIGNMENT`].
    pub large_block_size: usize,
    /// Small blocks allocated per growth batch.
    pub small_granularity: usize,
    /// Large blocks allocated per growth batch.
    pub large_granularity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            small_block_size: DEFAULT_SMALL_BLOCK_SIZE,
            large_block_size: DEFAULT_LARGE_BLOCK_SIZE,
            small_granularity: 8,
            large_granularity: 2,
        }
    }
}

impl PoolConfig {
    /// Small footprint preset for tools and tests: 4KB / 64KB blocks.
    #[must_use]
    pub const fn compact() -> Self {
        Self {
            small_block_size: 4 * 1024,
            large_block_size: 64 * 1024,
            small_granularity: 4,
            large_granularity: 1,
        }
    }

    /// Checks sizes and granularities.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if any value is zero or a block size is not a
    /// multiple of [`ALIGNMENT`].
    pub fn validate(&self) -> MemoryResult<()> {
        if self.small_granularity == 0 || self.large_granularity == 0 {
            return Err(MemoryError::InvalidConfig(
                "granularity must be greater than zero".into(),
            ));
        }
        for (name, size) in [
            ("small_block_size", self.small_block_size),
            ("large_block_size", self.large_block_size),
        ] {
            if size == 0 || !is_multiple(size) {
                return Err(MemoryError::InvalidConfig(format!(
                    "{name} = {size} must be a non-zero multiple of {ALIGNMENT}"
                )));
            }
        }
        Ok(())
    }
}

/// Top-level substrate configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstrateConfig {
    /// Block pool settings.
    pub pool: PoolConfig,
}

impl SubstrateConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on a parse failure or a value rejected by
    /// [`PoolConfig::validate`].
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| MemoryError::InvalidConfig(e.to_string()))?;
        config.pool.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if serialization fails.
    pub fn to_toml_string(&self) -> MemoryResult<String> {
        toml::to_string(self).map_err(|e| MemoryError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::compact().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SubstrateConfig::from_toml_str(
            "[pool]\nsmall_block_size = 8192\nsmall_granularity = 3\n",
        )
        .unwrap();
        assert_eq!(config.pool.small_block_size, 8192);
        assert_eq!(config.pool.small_granularity, 3);
        assert_eq!(config.pool.large_block_size, DEFAULT_LARGE_BLOCK_SIZE);
    }

    #[test]
    fn test_rejects_unaligned_block_size() {
        let err = SubstrateConfig::from_toml_str("[pool]\nsmall_block_size = 1000\n").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_granularity() {
        let err = SubstrateConfig::from_toml_str("[pool]\nlarge_granularity = 0\n").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SubstrateConfig {
            pool: PoolConfig::compact(),
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(SubstrateConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!(
            "strata_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[pool]\nlarge_block_size = 131072\n").unwrap();
        let config = SubstrateConfig::from_file(&path).unwrap();
        assert_eq!(config.pool.large_block_size, 131_072);
        std::fs::remove_file(&path).ok();

        assert!(SubstrateConfig::from_file(&path).is_err());
    }
}
