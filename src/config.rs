//! TOML configuration: registered repositories, capability endpoints,
//! embedding profiles and daemon tuning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embed::EmbeddingProfile;
use crate::error::{AtlasError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub enricher: Option<EnricherConfig>,
    #[serde(default)]
    pub embedder: Option<EmbedderConfig>,
    #[serde(default)]
    pub profiles: Vec<EmbeddingProfile>,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key; keys never live in the file.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_capability_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_parallel_repos")]
    pub max_parallel_repos: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// When true, `unregister` also deletes the repository's store directory.
    #[serde(default)]
    pub purge_on_unregister: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_parallel_repos: default_max_parallel_repos(),
            max_in_flight: default_max_in_flight(),
            batch_size: default_batch_size(),
            purge_on_unregister: false,
        }
    }
}

fn default_capability_timeout_secs() -> u64 {
    60
}

fn default_interval_secs() -> u64 {
    120
}

fn default_max_parallel_repos() -> usize {
    2
}

fn default_max_in_flight() -> usize {
    4
}

fn default_batch_size() -> usize {
    16
}

impl EnricherConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_ref().and_then(|var| std::env::var(var).ok())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EmbedderConfig {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_ref().and_then(|var| std::env::var(var).ok())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AtlasConfig {
    /// Default location: `$HOME/.config/code-atlas/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| AtlasError::Config("HOME is not set".to_string()))?;
        Ok(PathBuf::from(home).join(".config").join("code-atlas").join("config.toml"))
    }

    /// Loads the config, returning defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| AtlasError::Config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| AtlasError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if profile.dim == 0 {
                return Err(AtlasError::Config(format!(
                    "profile '{}' has zero dimensions",
                    profile.name
                )));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(AtlasError::Config(format!(
                    "duplicate embedding profile '{}'",
                    profile.name
                )));
            }
        }
        Ok(())
    }

    pub fn is_registered(&self, root: &Path) -> bool {
        self.repositories.iter().any(|r| r.root == root)
    }

    /// Registers a repository root; returns false when already present.
    pub fn register(&mut self, root: PathBuf) -> bool {
        if self.is_registered(&root) {
            return false;
        }
        self.repositories.push(RepositoryConfig { root });
        true
    }

    /// Removes a repository root; returns false when it was not registered.
    pub fn unregister(&mut self, root: &Path) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.root != root);
        self.repositories.len() != before
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.name.clone()).collect()
    }

    pub fn default_profile(&self) -> Option<&EmbeddingProfile> {
        self.profiles
            .iter()
            .find(|p| p.name == EmbeddingProfile::DEFAULT_NAME)
            .or_else(|| self.profiles.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AtlasConfig::load(&dir.path().join("config.toml")).unwrap();
        assert!(config.repositories.is_empty());
        assert_eq!(config.daemon.interval_secs, 120);
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AtlasConfig::default();
        assert!(config.register(PathBuf::from("/tmp/repo")));
        assert!(!config.register(PathBuf::from("/tmp/repo")));
        config.profiles.push(EmbeddingProfile {
            name: "default".to_string(),
            model: "nomic-embed-text".to_string(),
            dim: 768,
        });
        config.save(&path).unwrap();

        let loaded = AtlasConfig::load(&path).unwrap();
        assert_eq!(loaded.repositories.len(), 1);
        assert_eq!(loaded.default_profile().unwrap().dim, 768);

        assert!(config.unregister(Path::new("/tmp/repo")));
        assert!(!config.unregister(Path::new("/tmp/repo")));
    }

    #[test]
    fn test_parses_full_document() {
        let raw = r#"
            [[repositories]]
            root = "/work/service"

            [enricher]
            endpoint = "http://localhost:11434/v1"
            model = "qwen2.5-coder"
            api_key_env = "ATLAS_ENRICHER_KEY"

            [embedder]
            endpoint = "http://localhost:11434/v1"
            timeout_secs = 30

            [[profiles]]
            name = "default"
            model = "nomic-embed-text"
            dim = 768

            [daemon]
            interval_secs = 60
            max_parallel_repos = 4
        "#;
        let config: AtlasConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.repositories[0].root, PathBuf::from("/work/service"));
        assert_eq!(config.enricher.as_ref().unwrap().timeout_secs, 60);
        assert_eq!(config.embedder.as_ref().unwrap().timeout_secs, 30);
        assert_eq!(config.daemon.max_parallel_repos, 4);
        assert_eq!(config.daemon.batch_size, 16);
    }

    #[test]
    fn test_rejects_duplicate_profiles() {
        let raw = r#"
            [[profiles]]
            name = "default"
            model = "a"
            dim = 8

            [[profiles]]
            name = "default"
            model = "b"
            dim = 16
        "#;
        let config: AtlasConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_err());
    }
}
