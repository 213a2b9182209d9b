use std::io::{Cursor, Seek, Write};
use std::path::Path;

use anyhow::Context;

/// Full-scale factor: amplitude 1.0 maps to 32767, -1.0 to -32768.
const PCM_SCALE: f32 = 32768.0;

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Convert f32 amplitudes to 16-bit signed PCM.
///
/// Scaling is linear and truncates toward zero; out-of-range values saturate
/// and NaN becomes silence. Both the WAV writer and the streaming path go
/// through this, so their sample data is identical.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Little-endian byte layout of a PCM slice, as sent over the wire.
pub fn pcm_to_le_bytes(pcm: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

fn write_pcm<W: Write + Seek>(writer: W, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let mut writer = hound::WavWriter::new(writer, wav_spec(sample_rate))
        .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;
    for v in to_pcm16(samples) {
        writer
            .write_sample(v)
            .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
    }
    writer
        .finalize()
        .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))
}

/// Encode mono samples as an in-memory 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    // WAV header (44 bytes) + samples (2 bytes per sample)
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    write_pcm(&mut cursor, samples, sample_rate)?;
    Ok(cursor.into_inner())
}

/// Write mono samples to `path` as a 16-bit PCM WAV file.
pub fn write_wav_file<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_pcm(std::io::BufWriter::new(file), samples, sample_rate)
        .with_context(|| format!("Failed to write WAV to {}", path.display()))
}
