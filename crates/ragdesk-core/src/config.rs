//! Persisted configuration (models, chunking, directories) as TOML.
//!
//! Everything the library needs is passed in explicitly from a [`Config`]; nothing is
//! read from the environment here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::chunks::{ChunkConfig, ChunkError, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedding::DEFAULT_BATCH_SIZE;
use crate::ollama::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBED_MODEL};

const CONFIG_FILENAME: &str = "config.toml";
const DEFAULT_PERSIST_SUBDIR: &str = "vector_store";
const DEFAULT_DOCUMENTS_SUBDIR: &str = "content";
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the index and metadata files. Defaults to `<data dir>/vector_store`.
    pub persist_dir: Option<PathBuf>,
    /// Directory scanned for documents. Defaults to `<data dir>/content`.
    pub documents_dir: Option<PathBuf>,
    pub ollama_url: String,
    /// Sent as a bearer token to Ollama when set.
    pub api_key: Option<String>,
    pub embed_model: String,
    pub llm_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persist_dir: None,
            documents_dir: None,
            ollama_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            llm_model: DEFAULT_CHAT_MODEL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Config {
    pub fn persist_dir(&self) -> Result<PathBuf, ConfigError> {
        resolve(self.persist_dir.as_deref(), DEFAULT_PERSIST_SUBDIR)
    }

    pub fn documents_dir(&self) -> Result<PathBuf, ConfigError> {
        resolve(self.documents_dir.as_deref(), DEFAULT_DOCUMENTS_SUBDIR)
    }

    pub fn chunk_config(&self) -> Result<ChunkConfig, ChunkError> {
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
    }
}

fn resolve(configured: Option<&Path>, default_subdir: &str) -> Result<PathBuf, ConfigError> {
    match configured {
        Some(p) if !p.as_os_str().is_empty() => Ok(p.to_path_buf()),
        _ => Ok(app_data::app_data_dir()
            .ok_or(ConfigError::NoDataDir)?
            .join(default_subdir)),
    }
}

/// `config.toml` in the app data directory.
pub fn default_config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|d| d.join(CONFIG_FILENAME))
}

/// Load config from `path`, or from the app data directory when `path` is `None`.
/// A missing file yields the defaults; a malformed one is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or(ConfigError::NoDataDir)?,
    };
    let s = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(ConfigError::Read(path, e)),
    };
    toml::from_str(&s).map_err(|e| ConfigError::Parse(path, e))
}

/// Save config to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ConfigError::Write)?;
    }
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}
