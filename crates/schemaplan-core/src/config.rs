//! Resolver configuration.
//!
//! Configuration is optional. A missing file yields [`ResolverConfig::default`],
//! and every field falls back to its default when omitted:
//!
//! ```toml
//! # .schemaplan/config.toml
//! max_passes = 10000
//! max_set_retries = 32
//! strategies = ["set_alternative", "placeholder", "fallback_pair"]
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Location of the project config relative to the project root.
pub const PROJECT_CONFIG_PATH: &str = ".schemaplan/config.toml";

/// A cycle-breaking strategy, in the order the breaker should try them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Advance a dependency set to its next-highest-priority member.
    SetAlternative,
    /// Route the cyclic edge through a base placeholder of its target.
    Placeholder,
    /// Bracket the cyclic edge with a Fallback/EndFallback pair.
    FallbackPair,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SetAlternative => "set_alternative",
            Self::Placeholder => "placeholder",
            Self::FallbackPair => "fallback_pair",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Upper bound on detect-and-break rounds before a cycle is reported.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
    /// Upper bound on how often one dependency set may switch members.
    #[serde(default = "default_max_set_retries")]
    pub max_set_retries: usize,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_passes: default_max_passes(),
            max_set_retries: default_max_set_retries(),
            strategies: default_strategies(),
        }
    }
}

impl ResolverConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this layout.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse resolver config")?;
        config.dedup_strategies();
        Ok(config)
    }

    /// Keep the first occurrence of each strategy.
    fn dedup_strategies(&mut self) {
        let mut seen = Vec::with_capacity(self.strategies.len());
        self.strategies.retain(|kind| {
            if seen.contains(kind) {
                tracing::warn!(strategy = ?kind, "ignoring repeated cycle-breaking strategy");
                false
            } else {
                seen.push(*kind);
                true
            }
        });
    }
}

const fn default_max_passes() -> usize {
    10_000
}

const fn default_max_set_retries() -> usize {
    32
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::SetAlternative,
        StrategyKind::Placeholder,
        StrategyKind::FallbackPair,
    ]
}

/// Load a config file, returning defaults when it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<ResolverConfig> {
    if !path.exists() {
        return Ok(ResolverConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    ResolverConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load `.schemaplan/config.toml` under `project_root`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ResolverConfig> {
    load_config(&project_root.join(PROJECT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ResolverConfig::from_toml_str("").expect("parse");
        assert_eq!(config, ResolverConfig::default());
        assert_eq!(config.strategies.len(), 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = ResolverConfig::from_toml_str("max_set_retries = 2").expect("parse");
        assert_eq!(config.max_set_retries, 2);
        assert_eq!(config.max_passes, 10_000);
    }

    #[test]
    fn strategy_order_is_configurable() {
        let config =
            ResolverConfig::from_toml_str(r#"strategies = ["fallback_pair", "placeholder"]"#)
                .expect("parse");
        assert_eq!(
            config.strategies,
            vec![StrategyKind::FallbackPair, StrategyKind::Placeholder]
        );
    }

    #[test]
    fn repeated_strategies_are_dropped() {
        let config = ResolverConfig::from_toml_str(
            r#"strategies = ["placeholder", "placeholder", "set_alternative"]"#,
        )
        .expect("parse");
        assert_eq!(
            config.strategies,
            vec![StrategyKind::Placeholder, StrategyKind::SetAlternative]
        );
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(ResolverConfig::from_toml_str(r#"strategies = ["magic"]"#).is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_project_config(dir.path()).expect("load");
        assert_eq!(config, ResolverConfig::default());
    }

    #[test]
    fn project_file_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".schemaplan")).expect("mkdir");
        std::fs::write(dir.path().join(PROJECT_CONFIG_PATH), "max_passes = 7\n").expect("write");

        let config = load_project_config(dir.path()).expect("load");
        assert_eq!(config.max_passes, 7);
    }
}
