use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::Result;

/// Per-analysis-frame pitch-class magnitudes: 12 values per frame, one frame
/// every `hop_length` samples.
#[derive(Debug, Clone)]
pub struct Chromagram {
    frames: Vec<[f32; 12]>,
    hop_length: usize,
}

impl Chromagram {
    pub fn new(frames: Vec<[f32; 12]>, hop_length: usize) -> Self {
        Self { frames, hop_length }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    /// Timestamp of frame `index` in seconds.
    pub fn frame_time(&self, index: usize, sample_rate: u32) -> f32 {
        (index * self.hop_length) as f32 / sample_rate as f32
    }

    /// Highest-magnitude pitch class per frame, first index winning ties.
    pub fn argmax_per_frame(&self) -> Vec<usize> {
        self.frames
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .enumerate()
                    .fold((0usize, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                        if v > max {
                            (i, v)
                        } else {
                            (best, max)
                        }
                    })
                    .0
            })
            .collect()
    }
}

/// Tempo estimation oracle. Returns a list of BPM candidates; the detector
/// enforces that exactly one came back.
pub trait TempoOracle: Send + Sync {
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>>;
}

/// Chroma estimation oracle producing a 12-row magnitude matrix.
pub trait ChromaOracle: Send + Sync {
    fn estimate_chroma(
        &self,
        samples: &[f32],
        sample_rate: u32,
        hop_length: usize,
    ) -> Result<Chromagram>;
}

const TEMPO_FRAME_SIZE: usize = 1024;
const TEMPO_HOP: usize = 512;
const MIN_ONSET_SEPARATION_SEC: f32 = 0.1;
const FOLD_BPM_MIN: f32 = 60.0;
const FOLD_BPM_MAX: f32 = 200.0;

/// Onset-based tempo estimator.
///
/// Builds a frame-energy novelty curve, picks onsets above an adaptive
/// threshold, refines each onset to its peak sample, and converts the median
/// inter-onset interval to BPM. A buffer with fewer than two usable onsets
/// reports 0 BPM, which downstream treats as "never trigger".
pub struct OnsetTempoOracle;

impl OnsetTempoOracle {
    pub fn new() -> Self {
        Self
    }

    fn frame_energies(samples: &[f32]) -> Vec<f32> {
        samples
            .windows(TEMPO_FRAME_SIZE)
            .step_by(TEMPO_HOP)
            .map(|frame| {
                (frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32).sqrt()
            })
            .collect()
    }

    fn novelty(energies: &[f32]) -> Vec<f32> {
        let mut novelty = vec![0.0; energies.len()];
        for i in 1..energies.len() {
            novelty[i] = (energies[i] - energies[i - 1]).max(0.0);
        }
        novelty
    }

    fn onset_positions(samples: &[f32], sample_rate: u32) -> Vec<usize> {
        let energies = Self::frame_energies(samples);
        if energies.len() < 3 {
            return Vec::new();
        }
        let novelty = Self::novelty(&energies);

        let mean = novelty.iter().sum::<f32>() / novelty.len() as f32;
        let variance = novelty.iter().map(|n| (n - mean).powi(2)).sum::<f32>()
            / novelty.len() as f32;
        let threshold = mean + 2.0 * variance.sqrt();

        let min_separation = (sample_rate as f32 * MIN_ONSET_SEPARATION_SEC) as usize;
        let mut positions: Vec<usize> = Vec::new();

        for i in 1..novelty.len() - 1 {
            let is_peak = novelty[i] > threshold
                && novelty[i] >= novelty[i - 1]
                && novelty[i] > novelty[i + 1];
            if !is_peak {
                continue;
            }

            // Refine to the strongest sample inside the onset frame.
            let start = i * TEMPO_HOP;
            let end = (start + TEMPO_FRAME_SIZE).min(samples.len());
            let peak = samples[start..end]
                .iter()
                .enumerate()
                .fold((0usize, f32::NEG_INFINITY), |(best, max), (j, &x)| {
                    if x.abs() > max {
                        (j, x.abs())
                    } else {
                        (best, max)
                    }
                })
                .0
                + start;

            match positions.last() {
                Some(&last) if peak < last + min_separation => {}
                _ => positions.push(peak),
            }
        }

        positions
    }

    fn fold_bpm(bpm: f32) -> f32 {
        let mut bpm = bpm;
        while bpm >= FOLD_BPM_MAX {
            bpm /= 2.0;
        }
        while bpm > 0.0 && bpm < FOLD_BPM_MIN {
            bpm *= 2.0;
        }
        bpm
    }
}

impl Default for OnsetTempoOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoOracle for OnsetTempoOracle {
    fn estimate_tempo(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>> {
        let onsets = Self::onset_positions(samples, sample_rate);
        if onsets.len() < 2 {
            return Ok(vec![0.0]);
        }

        let mut intervals: Vec<usize> = onsets.windows(2).map(|w| w[1] - w[0]).collect();
        intervals.sort_unstable();
        let median = intervals[intervals.len() / 2];

        let bpm = 60.0 * sample_rate as f32 / median as f32;
        Ok(vec![Self::fold_bpm(bpm)])
    }
}

const CHROMA_FRAME_SIZE: usize = 2048;
// C3, the reference pitch the class indices are folded against.
const CHROMA_REFERENCE_HZ: f32 = 130.8128;
const CHROMA_FREQ_MIN_HZ: f32 = 80.0;
const CHROMA_FREQ_MAX_HZ: f32 = 5_000.0;

/// STFT-based chroma estimator: Hann-windowed FFT frames with bin magnitudes
/// folded onto the 12 pitch classes, each frame normalized to its maximum.
pub struct StftChromaOracle;

impl StftChromaOracle {
    pub fn new() -> Self {
        Self
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    fn chroma_of_frame(
        spectrum: &[f32],
        sample_rate: u32,
    ) -> [f32; 12] {
        let bin_width = sample_rate as f32 / CHROMA_FRAME_SIZE as f32;
        let mut chroma = [0.0f32; 12];

        for (bin, &magnitude) in spectrum.iter().enumerate().skip(1) {
            let freq = bin as f32 * bin_width;
            if !(CHROMA_FREQ_MIN_HZ..=CHROMA_FREQ_MAX_HZ).contains(&freq) {
                continue;
            }
            let semitones = 12.0 * (freq / CHROMA_REFERENCE_HZ).log2();
            let class = (semitones.round() as i32).rem_euclid(12) as usize;
            chroma[class] += magnitude;
        }

        let max = chroma.iter().cloned().fold(0.0f32, f32::max);
        if max > 0.0 {
            for value in &mut chroma {
                *value /= max;
            }
        }
        chroma
    }
}

impl Default for StftChromaOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChromaOracle for StftChromaOracle {
    fn estimate_chroma(
        &self,
        samples: &[f32],
        sample_rate: u32,
        hop_length: usize,
    ) -> Result<Chromagram> {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(CHROMA_FRAME_SIZE);
        let window = Self::hann_window(CHROMA_FRAME_SIZE);

        let num_frames = if samples.len() <= CHROMA_FRAME_SIZE {
            1
        } else {
            1 + (samples.len() - CHROMA_FRAME_SIZE) / hop_length
        };

        let mut frames = Vec::with_capacity(num_frames);
        for i in 0..num_frames {
            let start = i * hop_length;
            let end = (start + CHROMA_FRAME_SIZE).min(samples.len());

            let mut buffer: Vec<Complex<f32>> = samples[start..end]
                .iter()
                .zip(window.iter())
                .map(|(&x, &w)| Complex::new(x * w, 0.0))
                .collect();
            buffer.resize(CHROMA_FRAME_SIZE, Complex::new(0.0, 0.0));

            fft.process(&mut buffer);

            let spectrum: Vec<f32> = buffer[..CHROMA_FRAME_SIZE / 2]
                .iter()
                .map(|c| c.norm())
                .collect();

            frames.push(Self::chroma_of_frame(&spectrum, sample_rate));
        }

        Ok(Chromagram::new(frames, hop_length))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Click track: a decaying burst every beat, loudest at its first sample
    /// so onset refinement lands on the exact beat position.
    pub fn click_track(bpm: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let total = (seconds * sample_rate as f32) as usize;
        let beat_interval = (60.0 / bpm * sample_rate as f32) as usize;
        let mut samples = vec![0.0f32; total];
        let mut position = 0;
        while position < total {
            for (i, sample) in samples[position..total.min(position + 64)]
                .iter_mut()
                .enumerate()
            {
                *sample = 0.9 * (1.0 - i as f32 / 64.0);
            }
            position += beat_interval;
        }
        samples
    }

    pub fn sine(freq: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let total = (seconds * sample_rate as f32) as usize;
        (0..total)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{click_track, sine};
    use super::*;

    #[test]
    fn click_track_at_120_bpm_is_measured_exactly() {
        let samples = click_track(120.0, 5.0, 44_100);
        let oracle = OnsetTempoOracle::new();
        let candidates = oracle.estimate_tempo(&samples, 44_100).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0] - 120.0).abs() < 1e-2);
    }

    #[test]
    fn silence_reports_zero_bpm() {
        let samples = vec![0.0f32; 44_100 * 3];
        let oracle = OnsetTempoOracle::new();
        let candidates = oracle.estimate_tempo(&samples, 44_100).unwrap();
        assert_eq!(candidates, vec![0.0]);
    }

    #[test]
    fn bpm_folding_normalizes_octave_errors() {
        assert_eq!(OnsetTempoOracle::fold_bpm(240.0), 120.0);
        assert_eq!(OnsetTempoOracle::fold_bpm(40.0), 80.0);
        assert_eq!(OnsetTempoOracle::fold_bpm(120.0), 120.0);
        assert_eq!(OnsetTempoOracle::fold_bpm(0.0), 0.0);
    }

    #[test]
    fn pure_a4_sine_dominates_the_a_class() {
        let samples = sine(440.0, 1.0, 44_100);
        let oracle = StftChromaOracle::new();
        let chromagram = oracle.estimate_chroma(&samples, 44_100, 512).unwrap();
        assert!(!chromagram.is_empty());

        let argmax = chromagram.argmax_per_frame();
        // A is pitch class index 9.
        let hits = argmax.iter().filter(|&&c| c == 9).count();
        assert!(hits * 2 > argmax.len());
    }

    #[test]
    fn short_input_still_yields_one_frame() {
        let samples = sine(440.0, 0.01, 44_100);
        let oracle = StftChromaOracle::new();
        let chromagram = oracle.estimate_chroma(&samples, 44_100, 512).unwrap();
        assert_eq!(chromagram.num_frames(), 1);
    }

    #[test]
    fn argmax_prefers_first_index_on_ties() {
        let chromagram = Chromagram::new(vec![[0.5; 12]], 512);
        assert_eq!(chromagram.argmax_per_frame(), vec![0]);
    }

    #[test]
    fn frame_times_follow_the_hop() {
        let chromagram = Chromagram::new(vec![[0.0; 12]; 4], 512);
        assert_eq!(chromagram.frame_time(0, 44_100), 0.0);
        assert!((chromagram.frame_time(2, 44_100) - 1024.0 / 44_100.0).abs() < 1e-6);
    }
}
