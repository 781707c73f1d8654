//! Engine configuration stored in `codegen.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use globset::Glob;
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values the
/// generation service documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub poll: PollConfig,
    pub upload: UploadConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    /// Status checks before a generation is declared timed out.
    pub max_attempts: u32,
    /// Fixed delay between status checks, in milliseconds.
    pub delay_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 360,
            delay_ms: 5_000,
        }
    }
}

impl PollConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// Reject snapshots whose encoded blob exceeds this many bytes.
    pub max_bytes: u64,
    /// Skip individual files larger than this many bytes.
    pub max_file_bytes: u64,
    /// Glob patterns (relative to each root) excluded from snapshots.
    pub exclude: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 200 * 1024 * 1024,
            max_file_bytes: 10 * 1024 * 1024,
            exclude: [
                ".git/**",
                "**/node_modules/**",
                "**/target/**",
                "**/.venv/**",
                "**/__pycache__/**",
                "**/dist/**",
                "**/build/**",
            ]
            .iter()
            .map(|pattern| pattern.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the generation service.
    pub endpoint: String,
    /// Environment variable holding the bearer token, if any.
    pub token_env: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            token_env: Some("CODEGEN_TOKEN".to_string()),
            request_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll.max_attempts == 0 {
            return Err(anyhow!("poll.max_attempts must be > 0"));
        }
        if self.poll.delay_ms == 0 {
            return Err(anyhow!("poll.delay_ms must be > 0"));
        }
        if self.upload.max_bytes == 0 {
            return Err(anyhow!("upload.max_bytes must be > 0"));
        }
        if self.upload.max_file_bytes == 0 {
            return Err(anyhow!("upload.max_file_bytes must be > 0"));
        }
        for pattern in &self.upload.exclude {
            Glob::new(pattern).with_context(|| format!("upload.exclude pattern '{pattern}'"))?;
        }
        if self.service.endpoint.trim().is_empty() {
            return Err(anyhow!("service.endpoint must be non-empty"));
        }
        if self.service.request_timeout_secs == 0 {
            return Err(anyhow!("service.request_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
