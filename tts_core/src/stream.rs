//! Framing for the streaming channel.
//!
//! Generation is not incremental: the model returns a whole waveform, which
//! is then converted to PCM and sliced into windows of `sample_rate` samples
//! (one second of audio each, the last one possibly shorter). Each window
//! becomes one binary message, followed by a single [`StreamCompletion`].

use serde::{Deserialize, Serialize};

use crate::wav::{pcm_to_le_bytes, to_pcm16};
use crate::{AudioResult, GenerationRequest, DEFAULT_LANGUAGE, DEFAULT_VOICE};

/// Client control message. Every field is optional on the wire so that a
/// missing `text` can be answered in-band instead of failing the parse.
#[derive(Debug, Default, Deserialize)]
struct StreamRequest {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    instruct: Option<String>,
}

/// Parse one text frame into a request, or the error message to send back.
pub fn parse_stream_request(message: &str) -> Result<GenerationRequest, StreamError> {
    let req: StreamRequest = serde_json::from_str(message)
        .map_err(|e| StreamError::new(format!("invalid request: {e}")))?;

    let text = req.text.unwrap_or_default();
    if text.is_empty() {
        return Err(StreamError::new("missing text"));
    }

    Ok(GenerationRequest {
        text,
        voice: req.voice.unwrap_or_else(|| DEFAULT_VOICE.to_string()),
        language: req.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        instruct: req.instruct.unwrap_or_default(),
    })
}

/// Terminal control message of one request cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCompletion {
    pub done: bool,
    pub duration: f64,
    pub sample_rate: u32,
}

impl StreamCompletion {
    pub fn for_samples(total_samples: usize, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            0.0
        } else {
            round2(total_samples as f64 / sample_rate as f64)
        };
        Self {
            done: true,
            duration,
            sample_rate,
        }
    }
}

/// Error control message; the connection stays open after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    pub error: String,
}

impl StreamError {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Split PCM into consecutive windows of `window` samples.
///
/// A zero window yields nothing rather than panicking in `chunks`.
pub fn pcm_chunks(pcm: &[i16], window: usize) -> impl Iterator<Item = &[i16]> {
    let size = window.max(1);
    let take = if window == 0 { 0 } else { pcm.len() };
    pcm[..take].chunks(size)
}

/// The full message plan for one waveform: little-endian PCM frames in
/// order, then the completion marker.
pub fn frame_audio(audio: &AudioResult) -> (Vec<Vec<u8>>, StreamCompletion) {
    let pcm = to_pcm16(&audio.samples);
    let frames = pcm_chunks(&pcm, audio.sample_rate as usize)
        .map(pcm_to_le_bytes)
        .collect();
    (frames, StreamCompletion::for_samples(pcm.len(), audio.sample_rate))
}
