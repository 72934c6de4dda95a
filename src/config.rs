use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repositories: RepositoriesConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoriesConfig {
    pub base_path: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_concurrent_scans")]
    pub max_concurrent_scans: usize,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_max_concurrent_scans() -> usize {
    5
}

impl RepositoriesConfig {
    pub fn new(base_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache_dir: cache_dir.into(),
            exclude_globs: Vec::new(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_concurrent_scans: default_max_concurrent_scans(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_schema")]
    pub default_schema: String,
    #[serde(default = "default_schema_cache_ttl_secs")]
    pub schema_cache_ttl_secs: u64,
    #[serde(default = "default_query_cache_ttl_secs")]
    pub query_cache_ttl_secs: u64,
}

fn default_min_connections() -> u32 {
    1
}
fn default_max_connections() -> u32 {
    5
}
fn default_schema() -> String {
    "main".to_string()
}
fn default_schema_cache_ttl_secs() -> u64 {
    3600
}
fn default_query_cache_ttl_secs() -> u64 {
    900
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            default_schema: default_schema(),
            schema_cache_ttl_secs: default_schema_cache_ttl_secs(),
            query_cache_ttl_secs: default_query_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default = "default_relevance_cache_ttl_secs")]
    pub relevance_cache_ttl_secs: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            max_age_hours: default_max_age_hours(),
            relevance_cache_ttl_secs: default_relevance_cache_ttl_secs(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./data/contexts")
}
fn default_max_age_hours() -> i64 {
    24
}
fn default_relevance_cache_ttl_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate repositories
    let base = &config.repositories.base_path;
    if !base.is_dir() {
        anyhow::bail!(
            "repositories.base_path is not an accessible directory: {}",
            base.display()
        );
    }

    if config.repositories.max_concurrent_scans == 0 {
        anyhow::bail!("repositories.max_concurrent_scans must be >= 1");
    }

    for pattern in &config.repositories.exclude_globs {
        globset::Glob::new(pattern)
            .with_context(|| format!("Invalid repositories.exclude_globs pattern: '{}'", pattern))?;
    }

    // Validate database
    if let Some(db) = &config.database {
        if db.url.trim().is_empty() {
            anyhow::bail!("database.url must be set when [database] is present");
        }
        if db.max_connections == 0 {
            anyhow::bail!("database.max_connections must be >= 1");
        }
        if db.min_connections > db.max_connections {
            anyhow::bail!(
                "database.min_connections ({}) must not exceed database.max_connections ({})",
                db.min_connections,
                db.max_connections
            );
        }
        if db.default_schema.trim().is_empty() {
            anyhow::bail!("database.default_schema must not be empty");
        }
    }

    // Validate context
    if config.context.max_age_hours < 0 {
        anyhow::bail!("context.max_age_hours must be >= 0");
    }

    match config.logging.level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        other => anyhow::bail!(
            "Unknown logging level: '{}'. Must be trace, debug, info, warn, or error.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ctxa.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_defaults_apply() {
        let tmp = tempfile::TempDir::new().unwrap();
        let body = format!(
            "[repositories]\nbase_path = \"{}\"\n",
            tmp.path().display()
        );
        let config = load_config(&write_config(tmp.path(), &body)).unwrap();
        assert_eq!(config.repositories.cache_ttl_secs, 3600);
        assert_eq!(config.repositories.max_concurrent_scans, 5);
        assert!(config.database.is_none());
        assert_eq!(config.context.max_age_hours, 24);
        assert_eq!(config.context.relevance_cache_ttl_secs, 1800);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_base_path_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let body = "[repositories]\nbase_path = \"/definitely/not/here\"\n";
        let err = load_config(&write_config(tmp.path(), body)).unwrap_err();
        assert!(err.to_string().contains("base_path"));
    }

    #[test]
    fn test_database_pool_bounds_validated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let body = format!(
            "[repositories]\nbase_path = \"{}\"\n\n[database]\nurl = \"sqlite:x.db\"\nmin_connections = 6\nmax_connections = 2\n",
            tmp.path().display()
        );
        let err = load_config(&write_config(tmp.path(), &body)).unwrap_err();
        assert!(err.to_string().contains("min_connections"));
    }
}
