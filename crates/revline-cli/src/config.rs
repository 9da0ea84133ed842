//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for revline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub workers: WorkersConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".cache/revline"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub default: usize,
    pub max: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { default: 3, max: 16 }
    }
}

/// Per-source credentials and polite-pool contact details.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub openalex: SourceEntry,
    pub semantic_scholar: SourceEntry,
    pub crossref: SourceEntry,
    pub arxiv: SourceEntry,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourceEntry {
    pub polite_email: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
}

impl SourcesConfig {
    fn entry(&self, source: &str) -> Option<&SourceEntry> {
        match source {
            "openalex" => Some(&self.openalex),
            "semantic_scholar" => Some(&self.semantic_scholar),
            "crossref" => Some(&self.crossref),
            "arxiv" => Some(&self.arxiv),
            _ => None,
        }
    }

    /// Task option map seeded from this source's file config.
    pub fn task_config(&self, source: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(entry) = self.entry(source) {
            if let Some(email) = &entry.polite_email {
                map.insert("polite_email".to_string(), email.clone());
            }
            if let Some(key) = &entry.api_key {
                map.insert("api_key".to_string(), key.clone());
            }
        }
        map
    }
}

/// Deserialize a string that may contain an environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to its environment value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./revline.toml (current directory)
    /// 2. ~/.config/revline/config.toml
    ///
    /// If no config file is found, returns the default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("revline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "revline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.workers.default, 3);
        assert!(config.cache.dir.ends_with("revline"));
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
            [cache]
            dir = "/tmp/rl"

            [workers]
            default = 5
            max = 8

            [sources.openalex]
            polite_email = "review@example.org"

            [sources.semantic_scholar]
            api_key = "plain-key"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workers.default, 5);
        assert_eq!(
            config.sources.openalex.polite_email.as_deref(),
            Some("review@example.org")
        );
        let task = config.sources.task_config("semantic_scholar");
        assert_eq!(task.get("api_key").map(String::as_str), Some("plain-key"));
        assert!(config.sources.task_config("arxiv").is_empty());
    }

    #[test]
    fn env_var_expansion() {
        std::env::set_var("REVLINE_TEST_KEY", "secret");
        assert_eq!(
            expand_env_var("${REVLINE_TEST_KEY}").as_deref(),
            Some("secret")
        );
        assert_eq!(expand_env_var("literal").as_deref(), Some("literal"));
        assert_eq!(expand_env_var("${REVLINE_MISSING_VAR}"), None);
    }
}
