use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::actions::{Actions, AudioAction, BpmAction, BpmActionFrequency, PitchAction};
use crate::audio::buffers::{Buffer, SampleBuffer, TimedSampleBuffer};
use crate::audio::oracle::{OnsetTempoOracle, StftChromaOracle};
use crate::audio::pitch::PitchDetector;
use crate::audio::processor::FeatureProcessor;
use crate::audio::tempo::TempoDetector;
use crate::audio::ChromaClass;
use crate::blend::{BlendMode, FrameBlender, FrameMixer};
use crate::error::{MixerError, Result};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Buffer sizing knobs. The audio windows are expressed in seconds and
/// scaled by the sample rate when the buffers are built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSettings {
    pub audio_seconds_min: usize,
    pub audio_seconds_max: usize,
    pub bpm_readings_min: usize,
    pub bpm_readings_max: usize,
    /// Seconds of audio dropped from the front after each prediction, to
    /// throttle analysis cost.
    pub seconds_removed_per_prediction: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            audio_seconds_min: env_or("PULSEMIX_AUDIO_SECONDS_MIN", 4),
            audio_seconds_max: env_or("PULSEMIX_AUDIO_SECONDS_MAX", 10),
            bpm_readings_min: env_or("PULSEMIX_BPM_READINGS_MIN", 2),
            bpm_readings_max: env_or("PULSEMIX_BPM_READINGS_MAX", 10),
            seconds_removed_per_prediction: env_or("PULSEMIX_SECONDS_REMOVED", 1),
        }
    }
}

/// Everything the core consumes at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub bpm_frequency: Option<BpmActionFrequency>,
    pub beats_per_compass: u32,
    pub min_pitch: Option<u8>,
    pub max_pitch: Option<u8>,
    pub blend_mode: BlendMode,
    pub blend_falloff_sec: f64,
    pub bpm_tolerance: f32,
    pub buffers: BufferSettings,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: env_or("PULSEMIX_SAMPLE_RATE", 44_100),
            bpm_frequency: None,
            beats_per_compass: crate::actions::DEFAULT_BEATS_PER_COMPASS,
            min_pitch: None,
            max_pitch: None,
            blend_mode: BlendMode::Normal,
            blend_falloff_sec: 0.0,
            bpm_tolerance: crate::audio::tempo::DEFAULT_BPM_TOLERANCE,
            buffers: BufferSettings::default(),
        }
    }
}

impl MixerConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        let config: MixerConfig = serde_json::from_str(&contents)?;
        info!("loaded mixer config from {}", path.as_ref().display());
        Ok(config)
    }

    fn wants_bpm(&self) -> bool {
        self.bpm_frequency.is_some()
    }

    fn wants_pitch(&self) -> bool {
        self.min_pitch.is_some() && self.max_pitch.is_some()
    }

    fn pitch_range(&self) -> Result<(ChromaClass, ChromaClass)> {
        let min = self.min_pitch.unwrap_or(0);
        let max = self.max_pitch.unwrap_or(0);
        let min = ChromaClass::from_index(min as usize).ok_or_else(|| {
            MixerError::InvalidConfiguration(format!("min_pitch {min} is not a chroma class"))
        })?;
        let max = ChromaClass::from_index(max as usize).ok_or_else(|| {
            MixerError::InvalidConfiguration(format!("max_pitch {max} is not a chroma class"))
        })?;
        Ok((min, max))
    }

    /// The trigger actions this configuration asks for.
    pub fn build_actions(&self) -> Result<Actions> {
        let mut actions = Vec::new();

        if let Some(frequency) = self.bpm_frequency {
            actions.push(AudioAction::Bpm(BpmAction::new(
                frequency,
                self.beats_per_compass,
            )));
        }

        if self.wants_pitch() {
            let (min, max) = self.pitch_range()?;
            actions.push(AudioAction::Pitch(PitchAction::new(min, max)?));
        }

        Actions::new(actions, self.blend_falloff_sec)
    }

    fn bounded_audio_buffer(&self) -> Result<SampleBuffer> {
        let rate = self.sample_rate as usize;
        SampleBuffer::new(
            Some(self.buffers.audio_seconds_max * rate),
            self.buffers.audio_seconds_min * rate,
            self.buffers.seconds_removed_per_prediction * rate,
        )
    }

    fn tempo_detector(&self, audio_buffer: Box<dyn Buffer>) -> Result<TempoDetector> {
        let history = SampleBuffer::new(
            Some(self.buffers.bpm_readings_max),
            self.buffers.bpm_readings_min,
            0,
        )?;
        Ok(TempoDetector::new(
            audio_buffer,
            Box::new(history),
            Box::new(OnsetTempoOracle::new()),
        )
        .with_tolerance(self.bpm_tolerance)
        .with_throttling())
    }

    /// Detectors for the live path: bounded windows so memory and analysis
    /// cost stay flat over an arbitrarily long stream.
    pub fn build_stream_processor(&self) -> Result<FeatureProcessor> {
        let tempo = if self.wants_bpm() {
            Some(self.tempo_detector(Box::new(self.bounded_audio_buffer()?))?)
        } else {
            None
        };

        // Capture callbacks deliver irregular chunk sizes, so the pitch
        // window is kept aligned to wall-clock seconds.
        let pitch = if self.wants_pitch() {
            let window = TimedSampleBuffer::new(
                self.buffers.audio_seconds_max,
                self.buffers.audio_seconds_min,
                self.sample_rate as usize,
            )?;
            Some(PitchDetector::new(
                Box::new(window),
                Box::new(StftChromaOracle::new()),
            ))
        } else {
            None
        };

        FeatureProcessor::new(tempo, pitch)
    }

    /// Detectors for offline song analysis: the whole file is one window,
    /// so the buffers are unbounded and immediately ready.
    pub fn build_song_processor(&self) -> Result<FeatureProcessor> {
        let tempo = if self.wants_bpm() {
            Some(TempoDetector::new(
                Box::new(SampleBuffer::unbounded()),
                Box::new(SampleBuffer::unbounded()),
                Box::new(OnsetTempoOracle::new()),
            ))
        } else {
            None
        };

        let pitch = if self.wants_pitch() {
            Some(PitchDetector::new(
                Box::new(SampleBuffer::unbounded()),
                Box::new(StftChromaOracle::new()),
            ))
        } else {
            None
        };

        FeatureProcessor::new(tempo, pitch)
    }

    pub fn build_mixer(&self) -> FrameMixer {
        FrameMixer::new(FrameBlender::new(self.blend_mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_bpm() -> MixerConfig {
        MixerConfig {
            bpm_frequency: Some(BpmActionFrequency::Kick),
            ..MixerConfig::default()
        }
    }

    #[test]
    fn default_config_builds_no_actions() {
        let config = MixerConfig::default();
        assert!(config.build_actions().is_err());
        assert!(config.build_stream_processor().is_err());
    }

    #[test]
    fn bpm_only_config_builds_one_action_and_detector() {
        let config = config_with_bpm();
        assert!(config.build_actions().is_ok());
        assert!(config.build_stream_processor().is_ok());
    }

    #[test]
    fn pitch_range_is_validated() {
        let config = MixerConfig {
            min_pitch: Some(4),
            max_pitch: Some(4),
            ..MixerConfig::default()
        };
        assert!(matches!(
            config.build_actions(),
            Err(MixerError::InvalidRange { .. })
        ));

        let config = MixerConfig {
            min_pitch: Some(0),
            max_pitch: Some(12),
            ..MixerConfig::default()
        };
        assert!(matches!(
            config.build_actions(),
            Err(MixerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = MixerConfig {
            bpm_frequency: Some(BpmActionFrequency::TwoCompass),
            min_pitch: Some(0),
            max_pitch: Some(11),
            blend_mode: BlendMode::Darken,
            blend_falloff_sec: 0.5,
            ..MixerConfig::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: MixerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bpm_frequency, Some(BpmActionFrequency::TwoCompass));
        assert_eq!(parsed.blend_mode, BlendMode::Darken);
        assert_eq!(parsed.blend_falloff_sec, 0.5);
    }
}
