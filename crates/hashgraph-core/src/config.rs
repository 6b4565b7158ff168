//! Engine configuration, loaded from TOML.
//!
//! Every section and field has a default, so an empty or missing file yields
//! [`EngineConfig::default`].

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub finality: FinalityConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub acl: AclConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalityConfig {
    /// Fraction of eligible signers required for a vertex to be final.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Reject vertices stamped further than this into the local future.
    /// `None` disables the check.
    #[serde(default = "default_max_future_drift_ms")]
    pub max_future_drift_ms: Option<i64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_future_drift_ms: default_max_future_drift_ms(),
        }
    }
}

/// How concurrent grant/revoke pairs on the same peer are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[default]
    RevokeWins,
    GrantWins,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    /// Every peer is a writer.
    #[serde(default)]
    pub permissionless: bool,
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns an error if the finality threshold is not in `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let t = self.finality.threshold;
        if !(t > 0.0 && t <= 1.0) {
            bail!("finality.threshold must be in (0, 1], got {t}");
        }
        if let Some(drift) = self.validation.max_future_drift_ms
            && drift < 0
        {
            bail!("validation.max_future_drift_ms must not be negative, got {drift}");
        }
        Ok(())
    }
}

/// Load and validate a config file; a missing file yields defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read, is not valid
/// TOML for [`EngineConfig`], or fails [`EngineConfig::validate`].
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(config)
}

const fn default_threshold() -> f64 {
    0.51
}

const fn default_max_future_drift_ms() -> Option<i64> {
    Some(10_000)
}
