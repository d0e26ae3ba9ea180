use std::collections::VecDeque;
use std::time::Duration;

use log::warn;

use crate::error::{MixerError, Result};
use crate::timing::{Clock, SystemClock, TimeRecorder};

/// Bounded rolling storage for audio samples or scalar readings.
///
/// Each detector owns exactly one buffer per concern; buffers are never shared
/// between detector instances.
pub trait Buffer: Send {
    /// Append samples, dropping the oldest on overflow.
    fn add(&mut self, samples: &[f32]);

    /// True once the buffer holds enough data for a prediction.
    fn has_enough_data(&self) -> bool;

    /// Clear to empty.
    fn reset(&mut self);

    /// Drop the configured number of oldest samples. Used to throttle
    /// prediction frequency without discarding the whole history.
    fn remove_leading(&mut self);

    /// Chronological copy of the buffered samples.
    fn samples(&self) -> Vec<f32>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Count-bounded buffer: keeps at most `max_size` of the most recent samples.
#[derive(Debug)]
pub struct SampleBuffer {
    data: VecDeque<f32>,
    max_size: Option<usize>,
    min_size: usize,
    samples_to_remove: usize,
}

impl SampleBuffer {
    /// An unbounded buffer that is always ready for prediction.
    pub fn unbounded() -> Self {
        Self {
            data: VecDeque::new(),
            max_size: None,
            min_size: 0,
            samples_to_remove: 0,
        }
    }

    pub fn new(
        max_size: Option<usize>,
        min_size: usize,
        samples_to_remove: usize,
    ) -> Result<Self> {
        if let Some(max) = max_size {
            if max < min_size {
                return Err(MixerError::InvalidConfiguration(format!(
                    "max_size ({max}) must be equal or greater than min_size ({min_size})"
                )));
            }
        }

        Ok(Self {
            data: VecDeque::new(),
            max_size,
            min_size,
            samples_to_remove,
        })
    }

    fn rotate(&mut self) {
        if let Some(max) = self.max_size {
            while self.data.len() > max {
                self.data.pop_front();
            }
        }
    }
}

impl Buffer for SampleBuffer {
    fn add(&mut self, samples: &[f32]) {
        self.data.extend(samples.iter().copied());
        self.rotate();
    }

    fn has_enough_data(&self) -> bool {
        self.data.len() >= self.min_size
    }

    fn reset(&mut self) {
        self.data.clear();
    }

    fn remove_leading(&mut self) {
        let n = self.samples_to_remove.min(self.data.len());
        self.data.drain(..n);
    }

    fn samples(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Wall-clock-bounded buffer: samples are grouped into per-second columns so
/// irregular chunk sizes stay aligned to real time.
///
/// A new column opens once the injected clock reports a full second since the
/// last boundary. Columns are ragged; reads flatten only the filled portion of
/// each column in chronological order. On overflow the oldest whole seconds
/// are dropped, keeping at most `max_seconds + 1` columns (the newest column
/// is still being filled).
pub struct TimedSampleBuffer {
    columns: VecDeque<Vec<f32>>,
    cap_per_sec: usize,
    max_columns: usize,
    min_columns: usize,
    second_timer: TimeRecorder,
    warned_remove: bool,
}

impl TimedSampleBuffer {
    pub fn new(max_seconds: usize, min_seconds: usize, cap_per_sec: usize) -> Result<Self> {
        Self::with_clock(
            max_seconds,
            min_seconds,
            cap_per_sec,
            Box::new(SystemClock::new()),
        )
    }

    pub fn with_clock(
        max_seconds: usize,
        min_seconds: usize,
        cap_per_sec: usize,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        if max_seconds < 1 {
            return Err(MixerError::InvalidConfiguration(
                "max_seconds must be greater than 0".into(),
            ));
        }
        if max_seconds < min_seconds {
            return Err(MixerError::InvalidConfiguration(format!(
                "max_seconds ({max_seconds}) must be equal or greater than min_seconds ({min_seconds})"
            )));
        }
        if cap_per_sec < 1 {
            return Err(MixerError::InvalidConfiguration(
                "cap_per_sec must be greater than 0".into(),
            ));
        }

        let mut columns = VecDeque::new();
        columns.push_back(Vec::new());
        Ok(Self {
            columns,
            cap_per_sec,
            max_columns: max_seconds + 1,
            min_columns: min_seconds + 1,
            second_timer: TimeRecorder::with_clock(clock, Duration::from_secs(1)),
            warned_remove: false,
        })
    }

    fn rotate(&mut self) {
        while self.columns.len() > self.max_columns {
            self.columns.pop_front();
        }
    }

    pub fn seconds_held(&self) -> usize {
        self.columns.len()
    }
}

impl Buffer for TimedSampleBuffer {
    fn add(&mut self, samples: &[f32]) {
        self.second_timer.start_if_not_started();
        if self.second_timer.has_period_passed() {
            self.columns.push_back(Vec::new());
        }

        let column = self.columns.back_mut().expect("at least one column");
        let room = self.cap_per_sec - column.len();
        if samples.len() > room {
            warn!(
                "per-second capacity exceeded, dropping {} samples",
                samples.len() - room
            );
        }
        column.extend(samples.iter().take(room).copied());

        self.rotate();
    }

    fn has_enough_data(&self) -> bool {
        self.columns.len() >= self.min_columns && self.len() > 0
    }

    fn reset(&mut self) {
        self.columns.clear();
        self.columns.push_back(Vec::new());
    }

    fn remove_leading(&mut self) {
        if !self.warned_remove {
            warn!("timed buffer does not support leading-sample removal, ignoring");
            self.warned_remove = true;
        }
    }

    fn samples(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.len());
        for column in &self.columns {
            flat.extend_from_slice(column);
        }
        flat
    }

    fn len(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }
}
