//! Configuration file support for the `bloom` CLI.
//!
//! ```toml
//! [engine]
//! max_iterations = 100000
//! track_changes = true
//!
//! [store]
//! dir = "state"
//!
//! [run]
//! ticks = 10
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use bloom_eval::EngineConfig;
use serde::{Deserialize, Serialize};

/// Ticks `bloom run` allows before giving up on a stable state.
pub const DEFAULT_TICK_LIMIT: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,
}

/// Where durable tables live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the file-backed store. Durable tables stay in memory
    /// when unset.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RunConfig {
    /// Exact number of ticks to run. When unset, run until the program is
    /// stable.
    pub ticks: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {1}", path = .0.display())]
    Io(PathBuf, String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.max_iterations, Some(100_000));
        assert!(config.engine.track_changes);
        assert_eq!(config.store.dir, None);
        assert_eq!(config.run.ticks, None);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[engine]
max_iterations = 50

[store]
dir = "/var/lib/bloom"

[run]
ticks = 3

[logging]
level = "bloom_eval=debug"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.engine.max_iterations, Some(50));
        assert!(config.engine.track_changes);
        assert_eq!(config.store.dir, Some(PathBuf::from("/var/lib/bloom")));
        assert_eq!(config.run.ticks, Some(3));
        assert_eq!(config.logging.level, "bloom_eval=debug");
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml("[run]\nticks = 1\n").unwrap();
        assert_eq!(config.run.ticks, Some(1));
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::from_toml("[engine]\nmax_iterations = \"many\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bloom.toml");
        std::fs::write(&path, "[logging]\nlevel = \"info\"\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().logging.level, "info");
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(..))
        ));
    }
}
