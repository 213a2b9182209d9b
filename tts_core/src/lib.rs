//! Core of the speech service: the model session boundary, artifact
//! resolution, and the audio framing shared by the one-shot runner and the
//! server.

pub mod model;
pub mod resolve;
pub mod stream;
pub mod wav;

use serde::{Deserialize, Serialize};

pub use model::{ModelSession, PiperSession, SpeechModel, VoiceInfo};
pub use resolve::{resolve_model_source, ModelConfig, ModelSource};
pub use stream::{frame_audio, parse_stream_request, pcm_chunks, StreamCompletion, StreamError};
pub use wav::{encode_wav, pcm_to_le_bytes, to_pcm16, write_wav_file};

pub const DEFAULT_VOICE: &str = "Vivian";
pub const DEFAULT_LANGUAGE: &str = "English";

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Parameters of one generation call.
///
/// `text` has no serde default: a payload without it is rejected at
/// deserialization. An empty `text` deserializes fine and is caught by
/// [`GenerationRequest::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub instruct: String,
}

impl GenerationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: default_voice(),
            language: default_language(),
            instruct: String::new(),
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_instruct(mut self, instruct: impl Into<String>) -> Self {
        self.instruct = instruct.into();
        self
    }

    /// The only check this layer performs; voice and language are left to
    /// the model.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.text.is_empty() {
            anyhow::bail!("missing text");
        }
        Ok(())
    }
}

/// A fully computed waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioResult {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioResult {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration in seconds. Zero when the sample rate is zero.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Real-time factor: generation wall time over produced audio duration.
    /// Infinite for an empty waveform, matching how it is reported.
    pub fn real_time_factor(&self, generation_secs: f64) -> f64 {
        let duration = self.duration_secs();
        if duration > 0.0 {
            generation_secs / duration
        } else {
            f64::INFINITY
        }
    }
}
