use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use log::{info, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::audio::AudioChunk;

/// Live audio input: opens the default capture device and forwards
/// mono-downmixed chunks to the feature engine.
pub struct AudioCapture {
    #[allow(dead_code)]
    stream: Stream,
    sample_rate: u32,
}

impl AudioCapture {
    pub fn new(sender: UnboundedSender<AudioChunk>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no input device available"))?;

        let config = device
            .default_input_config()
            .map_err(|e| anyhow::anyhow!("failed to get default input config: {}", e))?;

        info!(
            "using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );
        info!("audio config: {:?}", config);

        let sample_rate = config.sample_rate().0;
        let stream = Self::create_input_stream(&device, &config.into(), sender)?;
        stream.play()?;

        Ok(Self {
            stream,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_input_stream(
        device: &Device,
        config: &StreamConfig,
        sender: UnboundedSender<AudioChunk>,
    ) -> Result<Stream> {
        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        info!("creating input stream with {channels} channels at {sample_rate} Hz");

        let stream = device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono_data: Vec<f32> = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect()
                };

                if sender.send(AudioChunk::new(mono_data, sample_rate)).is_err() {
                    warn!("failed to send audio data, engine gone");
                }
            },
            |err| {
                warn!("audio stream error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}
