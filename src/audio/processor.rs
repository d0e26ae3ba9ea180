use crate::audio::pitch::PitchDetector;
use crate::audio::tempo::TempoDetector;
use crate::audio::{AudioChunk, AudioFeatures};
use crate::error::{MixerError, Result};

/// Orchestrates the configured detectors over one audio chunk.
///
/// Tempo and pitch detection are independent tasks with no shared state, so
/// they are joined concurrently; the first error wins and the snapshot is
/// only assembled once both have completed.
pub struct FeatureProcessor {
    tempo: Option<TempoDetector>,
    pitch: Option<PitchDetector>,
}

impl std::fmt::Debug for FeatureProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureProcessor")
            .field("tempo", &self.tempo.is_some())
            .field("pitch", &self.pitch.is_some())
            .finish()
    }
}

impl FeatureProcessor {
    pub fn new(tempo: Option<TempoDetector>, pitch: Option<PitchDetector>) -> Result<Self> {
        if tempo.is_none() && pitch.is_none() {
            return Err(MixerError::InvalidConfiguration(
                "at least one detector must be configured".into(),
            ));
        }
        Ok(Self { tempo, pitch })
    }

    pub async fn process(&mut self, chunk: &AudioChunk) -> Result<AudioFeatures> {
        let Self { tempo, pitch } = self;

        let (bpm, pitches) = tokio::try_join!(
            async {
                match tempo {
                    Some(detector) => detector.detect(chunk).await,
                    None => Ok(None),
                }
            },
            async {
                match pitch {
                    Some(detector) => detector.detect(chunk).await,
                    None => Ok(None),
                }
            },
        )?;

        Ok(AudioFeatures { bpm, pitches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffers::SampleBuffer;
    use crate::audio::oracle::{ChromaOracle, Chromagram, TempoOracle};
    use crate::audio::ChromaClass;

    struct ConstantTempo(f32);

    impl TempoOracle for ConstantTempo {
        fn estimate_tempo(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>> {
            Ok(vec![self.0])
        }
    }

    struct ConstantChroma(usize);

    impl ChromaOracle for ConstantChroma {
        fn estimate_chroma(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            hop_length: usize,
        ) -> Result<Chromagram> {
            let mut frame = [0.0f32; 12];
            frame[self.0] = 1.0;
            Ok(Chromagram::new(vec![frame], hop_length))
        }
    }

    fn tempo_detector(bpm: f32) -> TempoDetector {
        TempoDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(SampleBuffer::unbounded()),
            Box::new(ConstantTempo(bpm)),
        )
    }

    fn pitch_detector(class: usize) -> PitchDetector {
        PitchDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(ConstantChroma(class)),
        )
        .with_mode(crate::audio::PitchOutputMode::Latest)
    }

    #[test]
    fn rejects_construction_without_detectors() {
        let err = FeatureProcessor::new(None, None).unwrap_err();
        assert!(matches!(err, MixerError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn assembles_both_features() {
        let mut processor =
            FeatureProcessor::new(Some(tempo_detector(120.0)), Some(pitch_detector(4))).unwrap();

        let features = processor
            .process(&AudioChunk::new(vec![0.1; 64], 44_100))
            .await
            .unwrap();

        assert_eq!(features.bpm, Some(120.0));
        assert_eq!(features.pitches, Some(vec![ChromaClass::E]));
    }

    #[tokio::test]
    async fn missing_detector_leaves_its_field_none() {
        let mut processor = FeatureProcessor::new(Some(tempo_detector(90.0)), None).unwrap();

        let features = processor
            .process(&AudioChunk::new(vec![0.1; 64], 44_100))
            .await
            .unwrap();

        assert_eq!(features.bpm, Some(90.0));
        assert!(features.pitches.is_none());
    }

    #[tokio::test]
    async fn detector_error_propagates() {
        struct BrokenTempo;
        impl TempoOracle for BrokenTempo {
            fn estimate_tempo(&self, _samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>> {
                Ok(vec![])
            }
        }

        let tempo = TempoDetector::new(
            Box::new(SampleBuffer::unbounded()),
            Box::new(SampleBuffer::unbounded()),
            Box::new(BrokenTempo),
        );
        let mut processor =
            FeatureProcessor::new(Some(tempo), Some(pitch_detector(0))).unwrap();

        let err = processor
            .process(&AudioChunk::new(vec![0.1; 64], 44_100))
            .await
            .unwrap_err();
        assert!(matches!(err, MixerError::UnexpectedOracleOutput { .. }));
    }
}
