//! TOML configuration.
//!
//! ```toml
//! [store]
//! cache_capacity = 1073741824
//!
//! [grid]
//! min_x = -180
//! max_x = 179
//! threads = 8
//!
//! [simplify]
//! tolerance = 0.0005
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub grid: GridConfig,
    pub simplify: SimplifyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// sled page cache size in bytes
    pub cache_capacity: u64,
    pub flush_on_close: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1024 * 1024 * 1024,
            flush_on_close: true,
        }
    }
}

/// Tile range and build behaviour for `build_range`
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GridConfig {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    /// Append to existing cells instead of clearing each tile first
    pub additive: bool,
    /// Worker threads, rayon's default when unset
    pub threads: Option<usize>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_x: -180,
            min_y: -90,
            max_x: 179,
            max_y: 89,
            additive: false,
            threads: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Degrees
    pub tolerance: f64,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self { tolerance: 0.0001 }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Defaults when no path is given
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default()),
        }
    }
}
