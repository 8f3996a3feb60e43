/// Configuration module for evidencemap.
///
/// Handles loading, validating, and providing default configuration values.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indexer::chunker::{self, ChunkOptions};
use crate::indexer::sanitiser::{self, Sanitiser};
use crate::pipeline::PipelineOptions;

pub const DEFAULT_CONFIG_PATH: &str = "evidencemap.json";

// ── Default value functions ──────────────────────────────────────────

fn default_db_path() -> String {
    "./evidence.db".to_string()
}

fn default_storage_dir() -> String {
    "./objects".to_string()
}

fn default_max_tokens_per_chunk() -> usize {
    chunker::DEFAULT_MAX_TOKENS_PER_CHUNK
}

fn default_overlap_tokens() -> usize {
    chunker::DEFAULT_OVERLAP_TOKENS
}

fn default_max_chars() -> usize {
    sanitiser::DEFAULT_MAX_CHARS
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_llm_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub sanitiser: SanitiserConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Free-text description of the organisation, passed to every match prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_context: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens_per_chunk")]
    pub max_tokens_per_chunk: usize,

    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SanitiserConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for a single extractor call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            storage_dir: default_storage_dir(),
            chunking: ChunkingConfig::default(),
            sanitiser: SanitiserConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
            org_context: None,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: default_max_tokens_per_chunk(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

impl Default for SanitiserConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"evidencemap.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file when the default path was used.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.chunking.max_tokens_per_chunk > 0,
            "chunking.max_tokens_per_chunk must be positive"
        );
        anyhow::ensure!(
            self.chunking.overlap_tokens > 0,
            "chunking.overlap_tokens must be positive"
        );
        anyhow::ensure!(
            self.chunking.overlap_tokens < self.chunking.max_tokens_per_chunk,
            "chunking.overlap_tokens must be smaller than max_tokens_per_chunk"
        );
        anyhow::ensure!(
            self.sanitiser.max_chars > 0,
            "sanitiser.max_chars must be positive"
        );
        anyhow::ensure!(self.llm.timeout_secs > 0, "llm.timeout_secs must be positive");
        anyhow::ensure!(self.llm.max_tokens > 0, "llm.max_tokens must be positive");
        anyhow::ensure!(!self.llm.model.is_empty(), "llm.model must be set");
        Ok(())
    }

    #[must_use]
    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            max_tokens_per_chunk: self.chunking.max_tokens_per_chunk,
            overlap_tokens: self.chunking.overlap_tokens,
        }
    }

    #[must_use]
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chunking: self.chunk_options(),
            sanitiser: Sanitiser::new(self.sanitiser.max_chars),
            call_timeout: Some(Duration::from_secs(self.llm.timeout_secs)),
            org_context: self.org_context.clone(),
        }
    }
}

// ── Input pattern helpers ────────────────────────────────────────────

/// Expand file arguments into a sorted, de-duplicated list of files.
///
/// Arguments containing `*` or `?` are treated as glob patterns; anything
/// else must name an existing file.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();

    for pattern in patterns {
        if !pattern.contains('*') && !pattern.contains('?') {
            let path = PathBuf::from(pattern);
            anyhow::ensure!(path.is_file(), "not a file: {pattern}");
            files.insert(path);
            continue;
        }

        let matches =
            glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
        let before = files.len();
        for entry in matches.flatten() {
            if entry.is_file() {
                files.insert(entry);
            }
        }
        if files.len() == before {
            warn!("Pattern matched no files: {pattern}");
        }
    }

    Ok(files.into_iter().collect())
}

// ── Tests ────────────────────────────────────────────────────────────
