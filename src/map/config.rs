//! Map construction parameters.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Configuration for a [`GridMap`](super::GridMap).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridMapConfig {
    /// Edge length of one distribution cell. Bundles use half of it.
    pub resolution: f64,

    /// Clamp small covariance eigenvalues so degenerate cells stay invertible.
    pub limit_covariance: bool,
}

impl Default for GridMapConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            limit_covariance: false,
        }
    }
}

impl GridMapConfig {
    /// Config with the given resolution and default options.
    pub fn with_resolution(resolution: f64) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    /// Load a config from a YAML file. Missing keys fall back to defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config: Self = serde_yaml::from_reader(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )
        .with_context(|| format!("Failed to parse {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject non-positive or non-finite resolutions.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            bail!("resolution must be positive and finite, got {}", self.resolution);
        }
        Ok(())
    }
}
