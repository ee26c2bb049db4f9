use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::builder::TreeOptions;
use crate::registry::RegistryOptions;
use crate::strategy::StrategyKind;

/// Name of the optional configuration file in a watched root.
pub const CONFIG_FILE: &str = "tree-sync.toml";

/// Configuration loaded from `tree-sync.toml` at the watched root.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TreeSyncConfig {
    /// Glob patterns for entries to leave out of the tree.
    pub exclude: Option<Vec<String>>,
    /// Quiet period before a burst of filesystem events triggers a rebuild.
    pub debounce_ms: u64,
    /// Interval of the blocking poll strategy.
    pub sync_poll_ms: u64,
    /// Interval of the non-blocking poll strategy.
    pub async_poll_ms: u64,
    /// Strategy used when none is given on the command line.
    pub strategy: StrategyKind,
}

impl Default for TreeSyncConfig {
    fn default() -> Self {
        Self {
            exclude: None,
            debounce_ms: 300,
            sync_poll_ms: 1500,
            async_poll_ms: 5000,
            strategy: StrategyKind::Push,
        }
    }
}

impl TreeSyncConfig {
    /// Load configuration from `tree-sync.toml` in the given root directory.
    ///
    /// Returns a default configuration if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), %err, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!(path = %config_path.display(), %err, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    pub fn tree_options(&self) -> TreeOptions {
        TreeOptions::with_exclude(self.exclude.iter().flatten())
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            debounce: Duration::from_millis(self.debounce_ms),
            tree: self.tree_options(),
        }
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_ms)
    }

    pub fn async_poll_interval(&self) -> Duration {
        Duration::from_millis(self.async_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TreeSyncConfig::load(dir.path());
        assert_eq!(config, TreeSyncConfig::default());
        assert_eq!(config.registry_options().debounce, Duration::from_millis(300));
        assert!(config.tree_options().exclude.is_empty());
    }

    #[test]
    fn test_partial_file_overrides_fields() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "exclude = [\"*.gz\", \".git\"]\nstrategy = \"async-poll\"\nasync_poll_ms = 2000\n",
        )
        .unwrap();

        let config = TreeSyncConfig::load(dir.path());
        assert_eq!(config.strategy, StrategyKind::AsyncPoll);
        assert_eq!(config.async_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.sync_poll_ms, 1500, "unset fields keep defaults");

        let options = config.tree_options();
        assert!(options.is_excluded(Path::new("/p/.git")));
        assert!(options.is_excluded(Path::new("/p/run.tar.gz")));
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "debounce_ms = \"soon\"").unwrap();
        assert_eq!(TreeSyncConfig::load(dir.path()), TreeSyncConfig::default());
    }
}
