use log::{debug, info};

use crate::audio::buffers::Buffer;
use crate::audio::oracle::TempoOracle;
use crate::audio::AudioChunk;
use crate::error::{MixerError, Result};

pub const DEFAULT_BPM_TOLERANCE: f32 = 10.0;

/// Rolling tempo estimator.
///
/// Accumulates audio into its own buffer, re-estimates BPM through the oracle
/// on every chunk, and smooths the readings over a second bounded buffer. A
/// reading far away from the recorded history is taken as a song change: both
/// buffers are wiped and re-seeded with the current chunk, so a stale tempo is
/// never dragged across a track boundary.
pub struct TempoDetector {
    audio_buffer: Box<dyn Buffer>,
    recorded_bpms: Box<dyn Buffer>,
    oracle: Box<dyn TempoOracle>,
    tolerance: f32,
    throttle_after_prediction: bool,
}

impl TempoDetector {
    pub fn new(
        audio_buffer: Box<dyn Buffer>,
        recorded_bpms: Box<dyn Buffer>,
        oracle: Box<dyn TempoOracle>,
    ) -> Self {
        Self {
            audio_buffer,
            recorded_bpms,
            oracle,
            tolerance: DEFAULT_BPM_TOLERANCE,
            throttle_after_prediction: false,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Drop the buffer's configured number of leading samples after each
    /// prediction so analysis does not run over the full history every chunk.
    pub fn with_throttling(mut self) -> Self {
        self.throttle_after_prediction = true;
        self
    }

    fn has_bpm_changed_significantly(&self, last_recorded_bpm: f32) -> bool {
        if !self.recorded_bpms.has_enough_data() || self.recorded_bpms.is_empty() {
            return false;
        }

        let recorded = self.recorded_bpms.samples();
        let avg_distance = recorded
            .iter()
            .map(|bpm| (last_recorded_bpm - bpm).abs())
            .sum::<f32>()
            / recorded.len() as f32;

        avg_distance > self.tolerance
    }

    fn avg_recorded_bpms(&self) -> Option<f32> {
        if !self.recorded_bpms.has_enough_data() || self.recorded_bpms.is_empty() {
            return None;
        }
        let recorded = self.recorded_bpms.samples();
        Some(recorded.iter().sum::<f32>() / recorded.len() as f32)
    }

    fn estimate(&self, sample_rate: u32) -> Result<f32> {
        let candidates = self
            .oracle
            .estimate_tempo(&self.audio_buffer.samples(), sample_rate)?;
        if candidates.len() != 1 {
            return Err(MixerError::UnexpectedOracleOutput {
                count: candidates.len(),
            });
        }
        Ok(candidates[0])
    }

    /// Feed one chunk, returning the smoothed BPM or `None` while either
    /// buffer is still warming up.
    pub async fn detect(&mut self, chunk: &AudioChunk) -> Result<Option<f32>> {
        self.audio_buffer.add(&chunk.samples);

        if !self.audio_buffer.has_enough_data() {
            return Ok(self.avg_recorded_bpms());
        }

        let last_recorded_bpm = self.estimate(chunk.sample_rate)?;

        if self.throttle_after_prediction {
            self.audio_buffer.remove_leading();
        }

        if self.has_bpm_changed_significantly(last_recorded_bpm) {
            info!(
                "BPM moved more than {} from the recorded history, treating as a song change",
                self.tolerance
            );
            self.audio_buffer.reset();
            self.recorded_bpms.reset();
            self.audio_buffer.add(&chunk.samples);
        }

        self.recorded_bpms.add(&[last_recorded_bpm]);
        debug!("recorded BPM reading: {last_recorded_bpm}");

        Ok(self.avg_recorded_bpms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffers::SampleBuffer;
    use std::sync::Mutex;

    /// Oracle scripted to return a fixed sequence of candidate lists.
    struct ScriptedOracle {
        outputs: Mutex<Vec<Vec<f32>>>,
    }

    impl ScriptedOracle {
        fn new(outputs: Vec<Vec<f32>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
            }
        }
    }

    impl TempoOracle for ScriptedOracle {
        fn estimate_tempo(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>> {
            Ok(self.outputs.lock().unwrap().remove(0))
        }
    }

    fn chunk(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.1; len], 44_100)
    }

    fn detector(outputs: Vec<Vec<f32>>) -> TempoDetector {
        TempoDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(SampleBuffer::unbounded()),
            Box::new(ScriptedOracle::new(outputs)),
        )
    }

    #[tokio::test]
    async fn returns_average_of_recorded_readings() {
        let mut detector = detector(vec![vec![100.0], vec![104.0]]);
        assert_eq!(detector.detect(&chunk(64)).await.unwrap(), Some(100.0));
        assert_eq!(detector.detect(&chunk(64)).await.unwrap(), Some(102.0));
    }

    #[tokio::test]
    async fn returns_none_until_audio_buffer_warms_up() {
        let mut detector = TempoDetector::new(
            Box::new(SampleBuffer::new(None, 100, 0).unwrap()),
            Box::new(SampleBuffer::unbounded()),
            Box::new(ScriptedOracle::new(vec![vec![120.0]])),
        );

        assert_eq!(detector.detect(&chunk(50)).await.unwrap(), None);
        assert_eq!(detector.detect(&chunk(50)).await.unwrap(), Some(120.0));
    }

    #[tokio::test]
    async fn returns_none_while_history_below_minimum() {
        let mut detector = TempoDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(SampleBuffer::new(None, 2, 0).unwrap()),
            Box::new(ScriptedOracle::new(vec![vec![120.0], vec![122.0]])),
        );

        assert_eq!(detector.detect(&chunk(64)).await.unwrap(), None);
        assert_eq!(detector.detect(&chunk(64)).await.unwrap(), Some(121.0));
    }

    #[tokio::test]
    async fn ambiguous_oracle_output_is_fatal() {
        let mut detector = detector(vec![vec![120.0, 240.0]]);
        let err = detector.detect(&chunk(64)).await.unwrap_err();
        assert!(matches!(
            err,
            MixerError::UnexpectedOracleOutput { count: 2 }
        ));
    }

    #[tokio::test]
    async fn empty_oracle_output_is_fatal() {
        let mut detector = detector(vec![vec![]]);
        let err = detector.detect(&chunk(64)).await.unwrap_err();
        assert!(matches!(
            err,
            MixerError::UnexpectedOracleOutput { count: 0 }
        ));
    }

    #[tokio::test]
    async fn distant_reading_resets_history_as_song_change() {
        // Three readings around 100 BPM, then a jump to 150.
        let mut detector = detector(vec![
            vec![100.0],
            vec![102.0],
            vec![101.0],
            vec![150.0],
        ]);

        for _ in 0..3 {
            detector.detect(&chunk(64)).await.unwrap();
        }

        // History wiped, so the average is only the fresh reading.
        assert_eq!(detector.detect(&chunk(64)).await.unwrap(), Some(150.0));
    }

    #[tokio::test]
    async fn close_reading_keeps_history() {
        let mut detector = detector(vec![vec![100.0], vec![104.0], vec![104.5]]);

        detector.detect(&chunk(64)).await.unwrap();
        detector.detect(&chunk(64)).await.unwrap();
        let smoothed = detector.detect(&chunk(64)).await.unwrap().unwrap();
        assert!((smoothed - 102.833).abs() < 1e-3);
    }

    #[tokio::test]
    async fn song_change_reseeds_audio_buffer_with_current_chunk() {
        let audio_buffer = SampleBuffer::unbounded();
        let mut detector = TempoDetector::new(
            Box::new(audio_buffer),
            Box::new(SampleBuffer::unbounded()),
            Box::new(ScriptedOracle::new(vec![
                vec![100.0],
                vec![100.0],
                vec![150.0],
                vec![150.0],
            ])),
        );

        for _ in 0..3 {
            detector.detect(&chunk(64)).await.unwrap();
        }
        // After the song change only the chunk that triggered it was
        // re-seeded; the next chunk lands on top of it.
        detector.detect(&chunk(64)).await.unwrap();
        assert_eq!(detector.audio_buffer.len(), 128);
    }

    #[tokio::test]
    async fn throttling_drops_leading_samples_after_prediction() {
        let mut detector = TempoDetector::new(
            Box::new(SampleBuffer::new(None, 0, 32).unwrap()),
            Box::new(SampleBuffer::unbounded()),
            Box::new(ScriptedOracle::new(vec![vec![120.0]])),
        )
        .with_throttling();

        detector.detect(&chunk(64)).await.unwrap();
        assert_eq!(detector.audio_buffer.len(), 32);
    }
}
