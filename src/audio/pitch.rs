use crate::audio::buffers::Buffer;
use crate::audio::oracle::ChromaOracle;
use crate::audio::{AudioChunk, ChromaClass};
use crate::error::Result;

pub const DEFAULT_HOP_LENGTH: usize = 512;

/// How the per-frame chroma estimates are reduced for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchOutputMode {
    /// Only the most recent analysis frame, as a length-1 sequence. Suits
    /// live streaming where only "now" matters.
    Latest,
    /// One dominant class per whole second, interpolated over the frame
    /// timestamps. The default for offline song analysis.
    PerSecond,
}

/// Dominant-pitch-class estimator over a rolling audio buffer.
pub struct PitchDetector {
    audio_buffer: Box<dyn Buffer>,
    oracle: Box<dyn ChromaOracle>,
    hop_length: usize,
    mode: PitchOutputMode,
    throttle_after_prediction: bool,
}

impl PitchDetector {
    pub fn new(audio_buffer: Box<dyn Buffer>, oracle: Box<dyn ChromaOracle>) -> Self {
        Self {
            audio_buffer,
            oracle,
            hop_length: DEFAULT_HOP_LENGTH,
            mode: PitchOutputMode::PerSecond,
            throttle_after_prediction: false,
        }
    }

    pub fn with_mode(mut self, mode: PitchOutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_hop_length(mut self, hop_length: usize) -> Self {
        self.hop_length = hop_length;
        self
    }

    pub fn with_throttling(mut self) -> Self {
        self.throttle_after_prediction = true;
        self
    }

    /// Linear interpolation over (times, values), clamped at both ends.
    fn interpolate(times: &[f32], values: &[f32], t: f32) -> f32 {
        debug_assert_eq!(times.len(), values.len());
        if t <= times[0] {
            return values[0];
        }
        if t >= times[times.len() - 1] {
            return values[values.len() - 1];
        }
        let upper = times.partition_point(|&time| time <= t);
        let (t0, t1) = (times[upper - 1], times[upper]);
        let (v0, v1) = (values[upper - 1], values[upper]);
        v0 + (v1 - v0) * (t - t0) / (t1 - t0)
    }

    fn reduce_per_second(
        &self,
        classes: &[usize],
        times: &[f32],
    ) -> Vec<ChromaClass> {
        let values: Vec<f32> = classes.iter().map(|&c| c as f32).collect();
        let last_second = times[times.len() - 1].round() as usize;

        (0..last_second)
            .map(|second| {
                let value = Self::interpolate(times, &values, second as f32);
                ChromaClass::from_index(value.round() as usize)
                    .expect("interpolated chroma stays within 0..=11")
            })
            .collect()
    }

    /// Feed one chunk, returning the reduced pitch sequence or `None` while
    /// the buffer is still warming up.
    pub async fn detect(&mut self, chunk: &AudioChunk) -> Result<Option<Vec<ChromaClass>>> {
        self.audio_buffer.add(&chunk.samples);

        if !self.audio_buffer.has_enough_data() {
            return Ok(None);
        }

        let chromagram = self.oracle.estimate_chroma(
            &self.audio_buffer.samples(),
            chunk.sample_rate,
            self.hop_length,
        )?;

        if self.throttle_after_prediction {
            self.audio_buffer.remove_leading();
        }

        if chromagram.is_empty() {
            return Ok(None);
        }

        let classes = chromagram.argmax_per_frame();

        match self.mode {
            PitchOutputMode::Latest => {
                let last = classes[classes.len() - 1];
                Ok(Some(vec![ChromaClass::from_index(last)
                    .expect("argmax index stays within 0..=11")]))
            }
            PitchOutputMode::PerSecond => {
                let times: Vec<f32> = (0..classes.len())
                    .map(|i| chromagram.frame_time(i, chunk.sample_rate))
                    .collect();
                Ok(Some(self.reduce_per_second(&classes, &times)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffers::SampleBuffer;
    use crate::audio::oracle::Chromagram;

    /// Oracle returning a fixed chromagram regardless of input.
    struct FixedChromaOracle {
        frames: Vec<[f32; 12]>,
        hop_length: usize,
    }

    impl ChromaOracle for FixedChromaOracle {
        fn estimate_chroma(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _hop_length: usize,
        ) -> Result<Chromagram> {
            Ok(Chromagram::new(self.frames.clone(), self.hop_length))
        }
    }

    fn frame_with_peak(class: usize) -> [f32; 12] {
        let mut frame = [0.1f32; 12];
        frame[class] = 1.0;
        frame
    }

    fn chunk(len: usize) -> AudioChunk {
        AudioChunk::new(vec![0.1; len], 44_100)
    }

    fn detector(frames: Vec<[f32; 12]>, hop_length: usize) -> PitchDetector {
        PitchDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(FixedChromaOracle { frames, hop_length }),
        )
        .with_hop_length(hop_length)
    }

    #[tokio::test]
    async fn returns_none_until_buffer_warms_up() {
        let mut detector = PitchDetector::new(
            Box::new(SampleBuffer::new(None, 100, 0).unwrap()),
            Box::new(FixedChromaOracle {
                frames: vec![frame_with_peak(0)],
                hop_length: 512,
            }),
        );

        assert_eq!(detector.detect(&chunk(50)).await.unwrap(), None);
        assert!(detector.detect(&chunk(50)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn latest_mode_returns_only_the_last_frame() {
        let frames = vec![frame_with_peak(0), frame_with_peak(4), frame_with_peak(7)];
        let mut detector = detector(frames, 512).with_mode(PitchOutputMode::Latest);

        let pitches = detector.detect(&chunk(64)).await.unwrap().unwrap();
        assert_eq!(pitches, vec![ChromaClass::G]);
    }

    #[tokio::test]
    async fn per_second_mode_interpolates_over_frame_times() {
        // With hop == sample_rate each frame lands exactly on a second
        // boundary: frame i is second i.
        let frames = vec![
            frame_with_peak(0),
            frame_with_peak(2),
            frame_with_peak(4),
            frame_with_peak(4),
        ];
        let mut detector = detector(frames, 44_100);

        let pitches = detector.detect(&chunk(64)).await.unwrap().unwrap();
        // Seconds 0..3 (the last labeled second is exclusive).
        assert_eq!(
            pitches,
            vec![ChromaClass::C, ChromaClass::D, ChromaClass::E]
        );
    }

    #[tokio::test]
    async fn per_second_mode_rounds_between_frames() {
        // Frames at 0s and 2s with classes 0 and 4: second 1 interpolates
        // to 2 (D).
        let frames = vec![frame_with_peak(0), frame_with_peak(4)];
        let mut detector = detector(frames, 88_200);

        let pitches = detector.detect(&chunk(64)).await.unwrap().unwrap();
        assert_eq!(pitches, vec![ChromaClass::C, ChromaClass::D]);
    }

    #[tokio::test]
    async fn single_frame_yields_empty_per_second_sequence() {
        let mut detector = detector(vec![frame_with_peak(3)], 512);
        let pitches = detector.detect(&chunk(64)).await.unwrap().unwrap();
        assert!(pitches.is_empty());
    }

    #[tokio::test]
    async fn throttling_drops_leading_samples_after_prediction() {
        let mut detector = PitchDetector::new(
            Box::new(SampleBuffer::new(None, 0, 32).unwrap()),
            Box::new(FixedChromaOracle {
                frames: vec![frame_with_peak(0)],
                hop_length: 512,
            }),
        )
        .with_throttling();

        detector.detect(&chunk(64)).await.unwrap();
        assert_eq!(detector.audio_buffer.len(), 32);
    }
}
