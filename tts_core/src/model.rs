//! The model session: one loaded model shared by every request.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::Context;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::resolve::{ModelConfig, ModelSource};
use crate::{AudioResult, GenerationRequest};

/// Fixed compute binding for model loading.
pub const COMPUTE_DEVICE: &str = "cpu";
/// Fixed numeric precision for model loading.
pub const PRECISION: &str = "f32";

const VOICE_CONFIG_SUFFIX: &str = ".onnx.json";

/// The inference capability behind every endpoint.
///
/// `generate` blocks for the whole synthesis and returns a complete
/// waveform. Implementations must tolerate concurrent calls from the
/// blocking pool.
pub trait SpeechModel: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<AudioResult>;

    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }
}

/// Shared handle to the loaded model, created once per process.
pub type ModelSession = Arc<dyn SpeechModel>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub sample_rate: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

/// The parts of a Piper voice config this layer reads.
#[derive(Debug, Clone, Deserialize)]
struct VoiceConfigFile {
    audio: AudioSection,
    #[serde(default)]
    language: Option<LanguageSection>,
}

#[derive(Debug, Clone, Deserialize)]
struct AudioSection {
    sample_rate: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LanguageSection {
    code: Option<String>,
    name_english: Option<String>,
}

#[derive(Debug, Clone)]
struct VoiceMeta {
    name: String,
    sample_rate: u32,
    language_code: Option<String>,
    language_name: Option<String>,
}

impl VoiceMeta {
    fn read(cfg_path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(cfg_path)
            .with_context(|| format!("Failed to read voice config: {}", cfg_path.display()))?;
        Self::parse(&voice_key(cfg_path), &text)
            .with_context(|| format!("Invalid voice config: {}", cfg_path.display()))
    }

    fn parse(name: &str, json: &str) -> anyhow::Result<Self> {
        let cfg: VoiceConfigFile =
            serde_json::from_str(json).context("Missing or invalid 'audio.sample_rate' in config")?;
        let language = cfg.language.unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            sample_rate: cfg.audio.sample_rate,
            language_code: language.code,
            language_name: language.name_english,
        })
    }

    /// Voices that declare no language accept any.
    fn check_language(&self, requested: &str) -> anyhow::Result<()> {
        let declared = [self.language_name.as_deref(), self.language_code.as_deref()];
        if declared.iter().all(Option::is_none) {
            return Ok(());
        }
        let matches = declared
            .iter()
            .flatten()
            .any(|lang| lang.eq_ignore_ascii_case(requested));
        if matches {
            Ok(())
        } else {
            anyhow::bail!(
                "Voice '{}' does not support language '{}' (speaks {})",
                self.name,
                requested,
                self.language_label()
            )
        }
    }

    fn language_label(&self) -> String {
        self.language_name
            .clone()
            .or_else(|| self.language_code.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

struct PiperVoice {
    meta: VoiceMeta,
    synth: RwLock<PiperSpeechSynthesizer>,
}

/// Piper ONNX voices loaded from one model snapshot.
pub struct PiperSession {
    // lowercase voice key -> voice
    voices: HashMap<String, PiperVoice>,
    // lowercase alias -> lowercase voice key
    aliases: HashMap<String, String>,
}

// Manual Debug implementation since PiperSpeechSynthesizer doesn't implement Debug
impl std::fmt::Debug for PiperSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.voices.keys().collect();
        names.sort();
        f.debug_struct("PiperSession")
            .field("voices", &names)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl PiperSession {
    /// Resolve the model artifact and load every voice it contains.
    ///
    /// Called once at startup; any failure here is fatal for the process.
    pub fn load(config: &ModelConfig) -> anyhow::Result<Self> {
        let source = config.resolve();
        info!(
            "Loading model from {source} (device={COMPUTE_DEVICE}, precision={PRECISION})..."
        );
        let t0 = Instant::now();

        let cfg_paths = match &source {
            ModelSource::Snapshot(dir) => find_voice_configs(dir)?,
            ModelSource::Hub(id) => download_voice_configs(config, id)?,
        };
        if cfg_paths.is_empty() {
            anyhow::bail!("No Piper voice configs (*{VOICE_CONFIG_SUFFIX}) found in {source}");
        }

        let mut voices = HashMap::new();
        for cfg_path in unique_voice_configs(cfg_paths) {
            let voice = Self::load_voice(&cfg_path)?;
            debug!(
                "Loaded voice '{}' ({} Hz) from {}",
                voice.meta.name,
                voice.meta.sample_rate,
                cfg_path.display()
            );
            voices.insert(voice.meta.name.to_lowercase(), voice);
        }

        let aliases = build_aliases(&config.voice_aliases, |key| voices.contains_key(key));

        info!(
            "Model loaded in {:.1}s ({} voice(s))",
            t0.elapsed().as_secs_f64(),
            voices.len()
        );
        Ok(Self { voices, aliases })
    }

    fn load_voice(cfg_path: &Path) -> anyhow::Result<PiperVoice> {
        let meta = VoiceMeta::read(cfg_path)?;
        let model = piper_rs::from_config_path(cfg_path)
            .map_err(|e| anyhow::anyhow!("piper load error for {}: {e}", cfg_path.display()))?;
        let synth = PiperSpeechSynthesizer::new(model)
            .map_err(|e| anyhow::anyhow!("piper synthesizer error: {e}"))?;
        Ok(PiperVoice {
            meta,
            synth: RwLock::new(synth),
        })
    }

    fn voice(&self, requested: &str) -> anyhow::Result<&PiperVoice> {
        find_voice(&self.voices, &self.aliases, requested).ok_or_else(|| {
            let mut available: Vec<&str> = self.voices.values().map(|v| v.meta.name.as_str()).collect();
            available.sort_unstable();
            anyhow::anyhow!(
                "Unknown voice '{}'. Available voices: {}",
                requested,
                available.join(", ")
            )
        })
    }
}

impl SpeechModel for PiperSession {
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<AudioResult> {
        let voice = self.voice(&request.voice)?;
        voice.meta.check_language(&request.language)?;
        if !request.instruct.is_empty() {
            debug!(
                "Voice '{}' has no style conditioning; ignoring instruct {:?}",
                voice.meta.name, request.instruct
            );
        }

        let synth = voice.synth.read().map_err(|_| {
            anyhow::anyhow!("Synthesizer lock poisoned - this indicates a previous panic. Please restart the server.")
        })?;

        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(request.text.clone(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(
                part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                    .into_vec(),
            );
        }

        Ok(AudioResult::new(samples, voice.meta.sample_rate))
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        let mut out: Vec<VoiceInfo> = self
            .voices
            .iter()
            .map(|(key, voice)| {
                let mut aliases: Vec<String> = self
                    .aliases
                    .iter()
                    .filter(|(_, target)| *target == key)
                    .map(|(alias, _)| alias.clone())
                    .collect();
                aliases.sort();
                VoiceInfo {
                    name: voice.meta.name.clone(),
                    language: voice.meta.language_label(),
                    sample_rate: voice.meta.sample_rate,
                    aliases,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// `en_US-lessac-medium.onnx.json` -> `lessac`; stems without the
/// `lang-speaker-quality` shape are used whole.
fn voice_key(cfg_path: &Path) -> String {
    let file_name = cfg_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(VOICE_CONFIG_SUFFIX).unwrap_or(&file_name);
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() >= 3 {
        parts[1..parts.len() - 1].join("-")
    } else {
        stem.to_string()
    }
}

/// Keep the first config per voice key. Paths arrive sorted, so
/// `en_US-lessac-high` wins over `en_US-lessac-medium`.
fn unique_voice_configs(cfg_paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();
    let mut out = Vec::with_capacity(cfg_paths.len());
    for path in cfg_paths {
        let key = voice_key(&path).to_lowercase();
        if let Some(first) = claimed.get(&key) {
            warn!(
                "Skipping {}: voice '{}' already provided by {}",
                path.display(),
                key,
                first.display()
            );
            continue;
        }
        claimed.insert(key, path.clone());
        out.push(path);
    }
    out
}

fn find_voice<'a, V>(
    voices: &'a HashMap<String, V>,
    aliases: &HashMap<String, String>,
    requested: &str,
) -> Option<&'a V> {
    let key = requested.to_lowercase();
    voices
        .get(&key)
        .or_else(|| aliases.get(&key).and_then(|target| voices.get(target)))
}

fn build_aliases<F: Fn(&str) -> bool>(pairs: &[(String, String)], has_voice: F) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    for (alias, target) in pairs {
        let target = target.to_lowercase();
        if has_voice(&target) {
            aliases.insert(alias.to_lowercase(), target);
        } else {
            warn!("Voice alias '{alias}' points at unknown voice '{target}'");
        }
    }
    aliases
}

/// All voice configs under a snapshot directory whose `.onnx` sibling exists.
fn find_voice_configs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .with_context(|| format!("Failed to read snapshot directory {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let is_config = path
                .file_name()
                .is_some_and(|n| n.to_string_lossy().ends_with(VOICE_CONFIG_SUFFIX));
            if !is_config {
                continue;
            }
            if onnx_path(&path).is_file() {
                found.push(path);
            } else {
                warn!("Skipping {}: model weights missing", path.display());
            }
        }
    }
    found.sort();
    Ok(found)
}

fn onnx_path(cfg_path: &Path) -> PathBuf {
    let s = cfg_path.to_string_lossy();
    PathBuf::from(s.strip_suffix(".json").unwrap_or(&s))
}

/// Fetch the configured voices (config + weights) into the hub cache.
fn download_voice_configs(config: &ModelConfig, model_id: &str) -> anyhow::Result<Vec<PathBuf>> {
    let api = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(config.cache_dir.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("HF Hub API init failed: {e}"))?;
    let repo = api.model(model_id.to_string());

    let mut out = Vec::with_capacity(config.voice_files.len());
    for file in &config.voice_files {
        info!("ensuring voice: {model_id}/{file}");
        let cfg_path = repo
            .get(file)
            .map_err(|e| anyhow::anyhow!("failed to download {file}: {e}"))?;
        let weights = file.strip_suffix(".json").unwrap_or(file);
        repo.get(weights)
            .map_err(|e| anyhow::anyhow!("failed to download {weights}: {e}"))?;
        out.push(cfg_path);
    }
    Ok(out)
}
