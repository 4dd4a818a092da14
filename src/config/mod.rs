use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 6702;
const DEFAULT_SCRIPT: &str = "sample.sh";
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub scripts_dir: PathBuf,
    pub default_script: String,
    pub execution_timeout_secs: u64,
    pub logs_dir: PathBuf,
    pub max_concurrent: usize,
}

impl Default for Config {
    fn default() -> Self {
        let database_url = crate::paths::data_dir()
            .map(|dir| format!("sqlite:{}", dir.join("batch_monitor.db").display()))
            .unwrap_or_else(|_| "sqlite:batch_monitor.db".to_string());
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            scripts_dir: crate::paths::scripts_dir().unwrap_or_else(|_| PathBuf::from("scripts")),
            default_script: DEFAULT_SCRIPT.to_string(),
            execution_timeout_secs: DEFAULT_TIMEOUT_SECS,
            logs_dir: crate::paths::logs_dir().unwrap_or_else(|_| PathBuf::from("logs")),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(DEFAULT_PORT);
        }

        if let Ok(dir) = std::env::var("BATCH_SCRIPTS_DIR") {
            config.scripts_dir = PathBuf::from(dir);
        }

        if let Ok(script) = std::env::var("BATCH_DEFAULT_SCRIPT") {
            config.default_script = script;
        }

        if let Ok(timeout) = std::env::var("BATCH_EXECUTION_TIMEOUT") {
            config.execution_timeout_secs = timeout
                .parse()
                .with_context(|| format!("Invalid BATCH_EXECUTION_TIMEOUT: {}", timeout))?;
        }

        if let Ok(dir) = std::env::var("BATCH_LOGS_DIR") {
            config.logs_dir = PathBuf::from(dir);
        }

        if let Ok(max) = std::env::var("BATCH_MAX_CONCURRENT") {
            config.max_concurrent = max
                .parse()
                .with_context(|| format!("Invalid BATCH_MAX_CONCURRENT: {}", max))?;
        }

        let root = crate::paths::install_root()?;
        config.normalize(&root)?;
        Ok(config)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(database_url) = file_config.database_url {
            self.database_url = database_url;
        }
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(scripts_dir) = file_config.scripts_dir {
            self.scripts_dir = PathBuf::from(scripts_dir);
        }
        if let Some(default_script) = file_config.default_script {
            self.default_script = default_script;
        }
        if let Some(timeout) = file_config.execution_timeout_secs {
            self.execution_timeout_secs = timeout;
        }
        if let Some(logs_dir) = file_config.logs_dir {
            self.logs_dir = PathBuf::from(logs_dir);
        }
        if let Some(max_concurrent) = file_config.max_concurrent {
            self.max_concurrent = max_concurrent;
        }
    }

    fn normalize(&mut self, root: &Path) -> Result<()> {
        self.normalize_database_url(root)?;
        self.scripts_dir = resolve_under_root(&self.scripts_dir, root, "scripts_dir")?;
        self.logs_dir = resolve_under_root(&self.logs_dir, root, "logs_dir")?;

        if self.default_script.trim().is_empty() {
            anyhow::bail!("default_script cannot be empty");
        }
        if self.execution_timeout_secs == 0 {
            anyhow::bail!("execution_timeout_secs must be greater than zero");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than zero");
        }
        Ok(())
    }

    fn normalize_database_url(&mut self, root: &Path) -> Result<()> {
        let Some(path_str) = self.database_url.strip_prefix("sqlite:") else {
            return Ok(());
        };
        if path_str.starts_with(":memory:") {
            return Ok(());
        }

        let path = Path::new(path_str);
        if path.is_absolute() {
            return Ok(());
        }

        if has_parent_component(path) {
            anyhow::bail!("SQLite database path cannot contain '..'");
        }

        let absolute = root.join(path);
        self.database_url = format!("sqlite:{}", absolute.display());
        Ok(())
    }
}

fn resolve_under_root(path: &Path, root: &Path, name: &str) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if has_parent_component(path) {
        anyhow::bail!("{} cannot contain '..'", name);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(root.join(path))
}

fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    scripts_dir: Option<String>,
    default_script: Option<String>,
    execution_timeout_secs: Option<u64>,
    logs_dir: Option<String>,
    max_concurrent: Option<usize>,
}
