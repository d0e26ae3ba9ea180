use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use hound::SampleFormat;
use log::info;
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::processor::FeatureProcessor;
use crate::audio::{AudioChunk, AudioFeatures};

/// Load a WAV file as one normalized mono chunk.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<AudioChunk> {
    let mut reader = hound::WavReader::open(&path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    info!(
        "loaded {}: {} samples at {} Hz",
        path.as_ref().display(),
        mono.len(),
        spec.sample_rate
    );
    Ok(AudioChunk::new(mono, spec.sample_rate))
}

/// Whole-file analysis: the complete song goes through the feature pipeline
/// in one pass, yielding the per-second pitch sequence and smoothed BPM used
/// by offline mixing.
pub struct SongAnalyzer {
    processor: FeatureProcessor,
}

impl SongAnalyzer {
    pub fn new(processor: FeatureProcessor) -> Self {
        Self { processor }
    }

    pub async fn analyze<P: AsRef<Path>>(&mut self, path: P) -> Result<AudioFeatures> {
        let chunk = load_wav(path)?;
        let features = self.processor.process(&chunk).await?;
        Ok(features)
    }
}

/// Replay a loaded song as a live stream: one-second chunks delivered at
/// playback pace, so the engine sees the same cadence a capture device
/// would produce.
pub async fn stream_wav_chunks(
    audio: AudioChunk,
    sender: UnboundedSender<AudioChunk>,
) -> Result<()> {
    let chunk_len = audio.sample_rate as usize;
    info!(
        "streaming {} seconds of audio in {}-sample chunks",
        audio.samples.len() / chunk_len.max(1),
        chunk_len
    );

    for window in audio.samples.chunks(chunk_len) {
        sender.send(AudioChunk::new(window.to_vec(), audio.sample_rate))?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}
