use futures::future::try_join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioFeatures, ChromaClass};
use crate::blend::BlendDecision;
use crate::error::{MixerError, Result};

/// How often a BPM action fires relative to the musical structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BpmActionFrequency {
    /// Once per beat.
    Kick,
    /// Once per bar.
    Compass,
    /// Every two bars.
    TwoCompass,
    /// Every four bars.
    FourCompass,
}

impl std::str::FromStr for BpmActionFrequency {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kick" => Ok(BpmActionFrequency::Kick),
            "compass" => Ok(BpmActionFrequency::Compass),
            "two_compass" => Ok(BpmActionFrequency::TwoCompass),
            "four_compass" => Ok(BpmActionFrequency::FourCompass),
            other => Err(MixerError::InvalidConfiguration(format!(
                "unknown BPM action frequency: {other}"
            ))),
        }
    }
}

impl BpmActionFrequency {
    fn bar_multiplier(self) -> f64 {
        match self {
            // Kick divides the bar instead of multiplying it.
            BpmActionFrequency::Kick => 0.0,
            BpmActionFrequency::Compass => 1.0,
            BpmActionFrequency::TwoCompass => 2.0,
            BpmActionFrequency::FourCompass => 4.0,
        }
    }
}

pub const DEFAULT_BEATS_PER_COMPASS: u32 = 4;

/// Periodic trigger locked to the detected tempo.
///
/// Two observable states: armed-without-tempo (never fires) and
/// armed-with-tempo (fires every action period). The accumulated counter
/// resets to the overshoot past the period, not to zero, so per-tick rounding
/// never drifts the phase.
pub struct BpmAction {
    frequency: BpmActionFrequency,
    beats_per_compass: u32,
    time_since_last_timeout_ms: f64,
    bpm: Option<f32>,
    action_period_sec: f64,
}

impl BpmAction {
    pub fn new(frequency: BpmActionFrequency, beats_per_compass: u32) -> Self {
        info!("BPM action: beats per compass {beats_per_compass}, frequency {frequency:?}");
        Self {
            frequency,
            beats_per_compass,
            time_since_last_timeout_ms: 0.0,
            bpm: None,
            action_period_sec: f64::INFINITY,
        }
    }

    /// A new tempo recomputes the period immediately; the in-flight counter
    /// is only reset by firing.
    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = Some(bpm);
        self.action_period_sec = self.period_sec(bpm);
    }

    /// Bar duration in seconds; a missing or zero tempo yields +infinity so
    /// nothing downstream divides by zero or fires.
    fn bar_duration_sec(bpm: f32, beats_per_compass: u32) -> f64 {
        if bpm <= 0.0 {
            return f64::INFINITY;
        }
        beats_per_compass as f64 / bpm as f64 * 60.0
    }

    fn period_sec(&self, bpm: f32) -> f64 {
        let bar = Self::bar_duration_sec(bpm, self.beats_per_compass);
        match self.frequency {
            BpmActionFrequency::Kick => bar / self.beats_per_compass as f64,
            frequency => bar * frequency.bar_multiplier(),
        }
    }

    pub fn act(&mut self, time_in_ms: f64) -> bool {
        self.time_since_last_timeout_ms += time_in_ms;

        if self.bpm.is_none() {
            return false;
        }

        let elapsed_sec = self.time_since_last_timeout_ms / 1000.0;
        if elapsed_sec >= self.action_period_sec {
            debug!(
                "BPM {:?} fired, period {}s",
                self.bpm, self.action_period_sec
            );
            let overshoot_sec = elapsed_sec - self.action_period_sec;
            self.time_since_last_timeout_ms = overshoot_sec * 1000.0;
            return true;
        }
        false
    }
}

/// Trigger that fires while the dominant pitch class of the current second
/// sits inside an inclusive range.
pub struct PitchAction {
    min_pitch: ChromaClass,
    max_pitch: ChromaClass,
    chromas: Option<Vec<ChromaClass>>,
    total_time_in_ms: f64,
}

impl PitchAction {
    pub fn new(min_pitch: ChromaClass, max_pitch: ChromaClass) -> Result<Self> {
        if min_pitch >= max_pitch {
            return Err(MixerError::InvalidRange {
                min: min_pitch,
                max: max_pitch,
            });
        }
        Ok(Self {
            min_pitch,
            max_pitch,
            chromas: None,
            total_time_in_ms: 0.0,
        })
    }

    pub fn set_pitches(&mut self, chromas: Vec<ChromaClass>) {
        self.chromas = Some(chromas);
    }

    pub fn act(&mut self, time_in_ms: f64) -> Result<bool> {
        self.total_time_in_ms += time_in_ms;

        let Some(chromas) = &self.chromas else {
            return Ok(false);
        };

        let second = (self.total_time_in_ms / 1000.0).round() as usize;
        // Asking about a second that was never analyzed is a caller bug;
        // clamping here would hide it.
        let chroma = *chromas
            .get(second)
            .ok_or(MixerError::OutOfRangeSecond {
                second,
                available: chromas.len(),
            })?;

        if self.min_pitch <= chroma && chroma <= self.max_pitch {
            debug!(
                "pitch fired: {chroma:?} within {:?}..={:?}",
                self.min_pitch, self.max_pitch
            );
            return Ok(true);
        }
        Ok(false)
    }
}

/// Closed set of trigger actions, matched exhaustively for feature routing.
pub enum AudioAction {
    Bpm(BpmAction),
    Pitch(PitchAction),
}

impl AudioAction {
    pub async fn act(&mut self, time_in_ms: f64) -> Result<bool> {
        match self {
            AudioAction::Bpm(action) => Ok(action.act(time_in_ms)),
            AudioAction::Pitch(action) => action.act(time_in_ms),
        }
    }

    fn apply_features(&mut self, features: &AudioFeatures) -> Result<()> {
        match self {
            AudioAction::Bpm(action) => {
                let bpm = features.bpm.ok_or(MixerError::MissingFeature("bpm"))?;
                action.set_bpm(bpm);
            }
            AudioAction::Pitch(action) => {
                let pitches = features
                    .pitches
                    .clone()
                    .ok_or(MixerError::MissingFeature("pitches"))?;
                action.set_pitches(pitches);
            }
        }
        Ok(())
    }
}

/// Runs every configured action each tick and folds the results into a
/// single blend decision with linear falloff after the last trigger.
pub struct Actions {
    actions: Vec<AudioAction>,
    time_since_last_action_ms: f64,
    blend_falloff_sec: f64,
}

impl Actions {
    pub fn new(actions: Vec<AudioAction>, blend_falloff_sec: f64) -> Result<Self> {
        if actions.is_empty() {
            return Err(MixerError::InvalidConfiguration(
                "at least one action must be configured".into(),
            ));
        }
        if blend_falloff_sec < 0.0 {
            return Err(MixerError::InvalidConfiguration(
                "blend_falloff_sec must not be negative".into(),
            ));
        }
        Ok(Self {
            actions,
            time_since_last_action_ms: f64::INFINITY,
            blend_falloff_sec,
        })
    }

    /// Push a fresh feature snapshot into every contained action. An action
    /// whose required feature is absent errors here, at application time.
    pub fn set_features(&mut self, features: &AudioFeatures) -> Result<()> {
        for action in &mut self.actions {
            action.apply_features(features)?;
        }
        Ok(())
    }

    pub async fn act(&mut self, time_in_ms: f64) -> Result<BlendDecision> {
        let triggers =
            try_join_all(self.actions.iter_mut().map(|action| action.act(time_in_ms))).await?;
        let triggered = triggers.into_iter().any(|fired| fired);

        if triggered {
            self.time_since_last_action_ms = 0.0;
            return Ok(BlendDecision {
                should_blend: true,
                strength: 1.0,
            });
        }

        self.time_since_last_action_ms += time_in_ms;
        if self.blend_falloff_sec == 0.0 {
            return Ok(BlendDecision {
                should_blend: false,
                strength: 0.0,
            });
        }

        let falloff_ms = self.blend_falloff_sec * 1000.0;
        let strength = (1.0 - self.time_since_last_action_ms / falloff_ms).max(0.0);
        Ok(BlendDecision {
            should_blend: strength > 0.0,
            strength: strength as f32,
        })
    }
}
