pub mod buffers;
pub mod capture;
pub mod oracle;
pub mod pitch;
pub mod processor;
pub mod song;
pub mod tempo;

pub use buffers::{Buffer, SampleBuffer, TimedSampleBuffer};
pub use oracle::{ChromaOracle, Chromagram, OnsetTempoOracle, StftChromaOracle, TempoOracle};
pub use pitch::{PitchDetector, PitchOutputMode};
pub use processor::FeatureProcessor;
pub use tempo::TempoDetector;

use serde::{Deserialize, Serialize};

/// One block of normalized mono samples handed to the feature pipeline.
/// Produced once per capture callback or file chunk, never mutated.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// The 12 pitch classes, octave-independent, ordered C through B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChromaClass {
    C = 0,
    CSharp = 1,
    D = 2,
    DSharp = 3,
    E = 4,
    F = 5,
    FSharp = 6,
    G = 7,
    GSharp = 8,
    A = 9,
    ASharp = 10,
    B = 11,
}

impl ChromaClass {
    pub const COUNT: usize = 12;

    pub fn from_index(index: usize) -> Option<Self> {
        use ChromaClass::*;
        const ALL: [ChromaClass; 12] = [
            C, CSharp, D, DSharp, E, F, FSharp, G, GSharp, A, ASharp, B,
        ];
        ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Feature snapshot assembled once per audio chunk.
///
/// A `None` field means the corresponding detector is not configured or has
/// not accumulated enough data yet; that is the normal cold-start path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub bpm: Option<f32>,
    pub pitches: Option<Vec<ChromaClass>>,
}
