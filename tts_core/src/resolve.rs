//! Model artifact resolution.
//!
//! A locally cached Hugging Face snapshot wins; otherwise the canonical hub
//! id is handed to the loader, which downloads through `hf-hub`.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

pub const DEFAULT_MODEL_ID: &str = "rhasspy/piper-voices";
pub const DEFAULT_VOICE_FILES: &[&str] = &["en/en_US/lessac/medium/en_US-lessac-medium.onnx.json"];
pub const DEFAULT_VOICE_ALIASES: &str = "Vivian=lessac";

/// Where the model weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A snapshot directory inside the local hub cache.
    Snapshot(PathBuf),
    /// A remote repository id, resolved by the hub client.
    Hub(String),
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Snapshot(p) => write!(f, "{}", p.display()),
            ModelSource::Hub(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_id: String,
    pub cache_dir: PathBuf,
    /// Repo-relative voice configs fetched when no local snapshot exists.
    pub voice_files: Vec<String>,
    /// `(alias, voice)` pairs, e.g. `("Vivian", "lessac")`.
    pub voice_aliases: Vec<(String, String)>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            cache_dir: default_cache_dir(),
            voice_files: DEFAULT_VOICE_FILES.iter().map(|s| s.to_string()).collect(),
            voice_aliases: parse_aliases(DEFAULT_VOICE_ALIASES),
        }
    }
}

impl ModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let model_id = std::env::var("TTS_MODEL_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.model_id);

        let voice_files = std::env::var("TTS_VOICE_FILES")
            .ok()
            .map(|v| split_list(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.voice_files);

        let voice_aliases = std::env::var("TTS_VOICE_ALIASES")
            .ok()
            .map(|v| parse_aliases(&v))
            .unwrap_or(defaults.voice_aliases);

        Self {
            model_id,
            cache_dir: defaults.cache_dir,
            voice_files,
            voice_aliases,
        }
    }

    pub fn resolve(&self) -> ModelSource {
        resolve_model_source(&self.cache_dir, &self.model_id)
    }
}

/// Hub cache root, honouring `HF_HUB_CACHE` and `HF_HOME` like the hub client.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HF_HUB_CACHE") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HF_HOME") {
        return PathBuf::from(home).join("hub");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("huggingface")
        .join("hub")
}

/// `org/name` -> `<cache>/models--org--name`
pub fn repo_cache_dir(cache_dir: &Path, model_id: &str) -> PathBuf {
    cache_dir.join(format!("models--{}", model_id.replace('/', "--")))
}

/// Prefer the lexicographically last snapshot directory, else the hub id.
pub fn resolve_model_source(cache_dir: &Path, model_id: &str) -> ModelSource {
    let snapshots = repo_cache_dir(cache_dir, model_id).join("snapshots");
    let Ok(entries) = fs::read_dir(&snapshots) else {
        return ModelSource::Hub(model_id.to_string());
    };

    let mut revs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    revs.sort();

    match revs.pop() {
        Some(rev) => ModelSource::Snapshot(rev),
        None => ModelSource::Hub(model_id.to_string()),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `alias=voice` pairs separated by commas. Malformed entries are
/// skipped with a warning.
pub fn parse_aliases(value: &str) -> Vec<(String, String)> {
    split_list(value)
        .into_iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((alias, voice)) if !alias.trim().is_empty() && !voice.trim().is_empty() => {
                Some((alias.trim().to_string(), voice.trim().to_string()))
            }
            _ => {
                warn!("Ignoring malformed voice alias '{entry}' (expected alias=voice)");
                None
            }
        })
        .collect()
}
