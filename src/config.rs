//! Configuration types and loading
//!
//! All settings live in one TOML file. Every field has a default matching
//! the daemon's historical behavior, so a partial (or missing) config file
//! still produces a runnable setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_in_port() -> u16 {
    2003
}

fn default_intake_depth() -> usize {
    1024
}

fn default_es_host() -> String {
    "localhost".to_string()
}

fn default_es_port() -> u16 {
    9200
}

fn default_es_index() -> String {
    "graphite_metrics2".to_string()
}

fn default_max_pending() -> usize {
    1_000_000
}

fn default_stats_host() -> String {
    "localhost".to_string()
}

fn default_stats_port() -> u16 {
    2005
}

fn default_stats_id() -> String {
    "myhost".to_string()
}

fn default_flush_interval() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Ingress listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// TCP port metric producers connect to.
    #[serde(default = "default_in_port")]
    pub port: u16,

    /// Depth of the shared intake channel between connection handlers and
    /// the classifier. When the classifier stalls on a full downstream
    /// queue, this is how many lines buffer up before producer sends block.
    #[serde(default = "default_intake_depth")]
    pub intake_depth: usize,
}

/// Settings for the tag index (Elasticsearch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default = "default_es_host")]
    pub host: String,

    #[serde(default = "default_es_port")]
    pub port: u16,

    /// Index that receives one document per distinct metric identity.
    #[serde(default = "default_es_index")]
    pub index: String,

    /// Maximum metric specs buffered between classification and indexing.
    /// A full queue blocks the classifier, which is the pipeline's only
    /// backpressure point.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

/// Settings for the periodic stats push to a graphite-style collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_stats_host")]
    pub host: String,

    #[serde(default = "default_stats_port")]
    pub port: u16,

    /// Instance identifier embedded in every reported stat line.
    #[serde(default = "default_stats_id")]
    pub id: String,

    /// Seconds between stat flushes.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            port: default_in_port(),
            intake_depth: default_intake_depth(),
        }
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: default_es_host(),
            port: default_es_port(),
            index: default_es_index(),
            max_pending: default_max_pending(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            host: default_stats_host(),
            port: default_stats_port(),
            id: default_stats_id(),
            flush_interval: default_flush_interval(),
        }
    }
}

impl Config {
    /// Reject values that would make the pipeline inoperable.
    pub fn validate(&self) -> Result<()> {
        if self.elasticsearch.max_pending == 0 {
            anyhow::bail!("elasticsearch.max_pending must be at least 1");
        }
        if self.ingest.intake_depth == 0 {
            anyhow::bail!("ingest.intake_depth must be at least 1");
        }
        if self.stats.flush_interval == 0 {
            anyhow::bail!("stats.flush_interval must be at least 1 second");
        }
        if self.elasticsearch.index.is_empty() {
            anyhow::bail!("elasticsearch.index must not be empty");
        }
        Ok(())
    }

    /// Base URL of the configured Elasticsearch node.
    pub fn es_url(&self) -> String {
        format!("http://{}:{}", self.elasticsearch.host, self.elasticsearch.port)
    }

    /// Address the stats reporter pushes to.
    pub fn stats_addr(&self) -> String {
        format!("{}:{}", self.stats.host, self.stats.port)
    }
}

pub fn load_config(config_path: &str) -> Result<Config> {
    let config_content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file '{}'", config_path))?;

    let config: Config = toml::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file '{}'", config_path))?;

    config.validate()?;
    Ok(config)
}

pub fn create_default_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = create_default_config();
        assert_eq!(config.ingest.port, 2003);
        assert_eq!(config.elasticsearch.port, 9200);
        assert_eq!(config.elasticsearch.index, "graphite_metrics2");
        assert_eq!(config.elasticsearch.max_pending, 1_000_000);
        assert_eq!(config.stats.port, 2005);
        assert_eq!(config.stats.flush_interval, 10);
        config.validate().expect("default config must validate");
    }

    #[test]
    fn test_load_config_from_file() -> Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(
            temp_file,
            r#"
[ingest]
port = 2103

[elasticsearch]
host = "es.internal"
max_pending = 500

[stats]
id = "tagger01"
"#
        )?;

        let config = load_config(temp_file.path().to_str().unwrap())?;
        assert_eq!(config.ingest.port, 2103);
        assert_eq!(config.elasticsearch.host, "es.internal");
        assert_eq!(config.elasticsearch.max_pending, 500);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.elasticsearch.port, 9200);
        assert_eq!(config.stats.id, "tagger01");
        assert_eq!(config.stats.host, "localhost");
        Ok(())
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let result = load_config("/nonexistent/path/carbon-tagger.toml");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_load_config_invalid_toml() -> Result<()> {
        let mut temp_file = NamedTempFile::new()?;
        write!(temp_file, "invalid toml content [[[")?;

        let result = load_config(temp_file.path().to_str().unwrap());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse config file")
        );
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_max_pending() {
        let mut config = create_default_config();
        config.elasticsearch.max_pending = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_flush_interval() {
        let mut config = create_default_config();
        config.stats.flush_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization_round_trip() -> Result<()> {
        let config = create_default_config();
        let toml_string = toml::to_string_pretty(&config)?;
        let deserialized: Config = toml::from_str(&toml_string)?;
        assert_eq!(deserialized, config);
        Ok(())
    }

    #[test]
    fn test_addresses() {
        let config = create_default_config();
        assert_eq!(config.es_url(), "http://localhost:9200");
        assert_eq!(config.stats_addr(), "localhost:2005");
    }
}
