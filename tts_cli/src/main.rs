//! One-shot speech generation: load the model, synthesize once, write a WAV.
//!
//! Progress goes to stderr; the output path receives only the audio file.

use std::path::PathBuf;
use std::time::Instant;

use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use tracing::info;

use tts_core::{GenerationRequest, ModelConfig, PiperSession, SpeechModel, DEFAULT_LANGUAGE, DEFAULT_VOICE};

#[derive(Parser, Debug)]
#[command(name = "tts-generate")]
#[command(about = "Generate speech from text")]
struct Args {
    /// Text to speak
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    text: String,

    /// Speaker voice
    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    /// Output .wav path
    #[arg(long)]
    output: PathBuf,

    /// Language
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Voice style instruction
    #[arg(long, default_value = "")]
    instruct: String,
}

impl Args {
    fn request(&self) -> GenerationRequest {
        GenerationRequest::new(self.text.clone())
            .with_voice(self.voice.clone())
            .with_language(self.language.clone())
            .with_instruct(self.instruct.clone())
    }
}

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let request = args.request();

    let model = PiperSession::load(&ModelConfig::from_env())?;

    if request.instruct.is_empty() {
        info!("Generating speech (voice={})...", request.voice);
    } else {
        info!(
            "Generating speech (voice={}, instruct={:?})...",
            request.voice, request.instruct
        );
    }
    let t0 = Instant::now();
    let audio = model.generate(&request)?;
    let t_gen = t0.elapsed().as_secs_f64();

    info!(
        "Generated {:.2}s of audio in {:.2}s (RTF={:.2})",
        audio.duration_secs(),
        t_gen,
        audio.real_time_factor(t_gen)
    );

    tts_core::write_wav_file(&args.output, &audio.samples, audio.sample_rate)?;
    info!("Saved to {}", args.output.display());
    Ok(())
}
