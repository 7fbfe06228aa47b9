use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            collection: default_collection(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/wordchunk.sqlite")
}
fn default_collection() -> String {
    "words".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Lines per chunk record; 0 keeps the whole import in one chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default)]
    pub skip_lines: u64,
    /// Lines to import after skipping; 0 means unlimited.
    #[serde(default)]
    pub limit_lines: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            skip_lines: 0,
            limit_lines: 0,
        }
    }
}

fn default_chunk_size() -> u64 {
    100_000
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            import: ImportConfig::default(),
        }
    }

    /// Default name of the pipeline output collection.
    pub fn aggregate_collection(&self) -> String {
        format!("{}_aggr", self.db.collection)
    }

    /// Default name of the map-reduce output collection.
    pub fn map_reduce_collection(&self) -> String {
        format!("{}_mr", self.db.collection)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db.collection.trim().is_empty() {
            anyhow::bail!("db.collection must not be empty");
        }
        if self.db.path.as_os_str().is_empty() {
            anyhow::bail!("db.path must not be empty");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_cli_conventions() {
        let cfg = Config::minimal();
        assert_eq!(cfg.db.collection, "words");
        assert_eq!(cfg.import.chunk_size, 100_000);
        assert_eq!(cfg.import.limit_lines, 0);
        assert_eq!(cfg.aggregate_collection(), "words_aggr");
        assert_eq!(cfg.map_reduce_collection(), "words_mr");
    }

    #[test]
    fn parses_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wordchunk.toml");
        std::fs::write(
            &path,
            "[db]\ncollection = \"lines\"\n\n[import]\nchunk_size = 2\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.db.collection, "lines");
        assert_eq!(cfg.db.path, default_db_path());
        assert_eq!(cfg.import.chunk_size, 2);
        assert_eq!(cfg.import.skip_lines, 0);
    }

    #[test]
    fn rejects_empty_collection() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wordchunk.toml");
        std::fs::write(&path, "[db]\ncollection = \"  \"\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_negative_numbers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wordchunk.toml");
        std::fs::write(&path, "[import]\nskip_lines = -1\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/wordchunk.example.toml");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.db.collection, "words");
        assert_eq!(cfg.import.chunk_size, 100_000);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_or_default(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.db.collection, "words");
    }
}
