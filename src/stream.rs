use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::actions::Actions;
use crate::audio::processor::FeatureProcessor;
use crate::audio::AudioChunk;
use crate::blend::{BlendDecision, Frame, FrameMixer};
use crate::error::{MixerError, Result};
use crate::timing::TimeRecorder;

/// Payloads crossing from the feature engine to the display loop. Only the
/// latest blend strength matters; stale values are drained and dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    BlendStrength(f32),
    Terminate,
}

/// Ordered frame pairs at a shared target resolution. Infinite: sequences
/// restart at end-of-clip.
pub trait FrameSource: Send {
    fn next_frame_pair(&mut self) -> (Frame, Frame, Option<Frame>);
    fn frame_rate(&self) -> f32;
}

/// In-memory cyclic frame source. Each sequence wraps independently, so
/// clips of different lengths keep cycling against each other.
pub struct CyclicFrameSource {
    frames_a: Vec<Frame>,
    frames_b: Vec<Frame>,
    alpha: Option<Vec<Frame>>,
    frame_rate: f32,
    position: usize,
}

impl CyclicFrameSource {
    pub fn new(
        frames_a: Vec<Frame>,
        frames_b: Vec<Frame>,
        alpha: Option<Vec<Frame>>,
        frame_rate: f32,
    ) -> Result<Self> {
        if frames_a.is_empty() || frames_b.is_empty() {
            return Err(MixerError::InvalidConfiguration(
                "frame sequences must not be empty".into(),
            ));
        }
        if alpha.as_ref().is_some_and(Vec::is_empty) {
            return Err(MixerError::InvalidConfiguration(
                "alpha sequence must not be empty when provided".into(),
            ));
        }
        if frame_rate <= 0.0 {
            return Err(MixerError::InvalidConfiguration(
                "frame_rate must be positive".into(),
            ));
        }
        Ok(Self {
            frames_a,
            frames_b,
            alpha,
            frame_rate,
            position: 0,
        })
    }
}

impl FrameSource for CyclicFrameSource {
    fn next_frame_pair(&mut self) -> (Frame, Frame, Option<Frame>) {
        let a = self.frames_a[self.position % self.frames_a.len()].clone();
        let b = self.frames_b[self.position % self.frames_b.len()].clone();
        let mask = self
            .alpha
            .as_ref()
            .map(|alpha| alpha[self.position % alpha.len()].clone());
        self.position += 1;
        (a, b, mask)
    }

    fn frame_rate(&self) -> f32 {
        self.frame_rate
    }
}

/// Display-side loop: pulls frame pairs, polls the control queue without
/// blocking, and composites one output frame per tick.
pub struct VideoCombiner {
    source: Box<dyn FrameSource>,
    mixer: FrameMixer,
    control: Receiver<ControlMessage>,
    keepalive: TimeRecorder,
    ms_between_frames: u64,
    frames_emitted: u64,
    frames_blended: u64,
}

/// One tick of the combiner loop.
pub enum StepOutcome {
    Frame(Frame),
    Terminated,
}

impl VideoCombiner {
    pub fn new(
        source: Box<dyn FrameSource>,
        mixer: FrameMixer,
        control: Receiver<ControlMessage>,
    ) -> Self {
        let ms_between_frames = (1000.0 / source.frame_rate()) as u64;
        info!("loaded combiner, {ms_between_frames}ms between frames");
        Self {
            source,
            mixer,
            control,
            keepalive: TimeRecorder::keepalive(),
            ms_between_frames,
            frames_emitted: 0,
            frames_blended: 0,
        }
    }

    /// Drain the control queue down to the freshest message. Queue loss is
    /// treated as "no trigger this tick", never as fatal.
    fn poll_decision(&mut self) -> Option<BlendDecision> {
        let mut latest = None;
        loop {
            match self.control.try_recv() {
                Ok(ControlMessage::Terminate) => return None,
                Ok(ControlMessage::BlendStrength(strength)) => {
                    latest = Some(BlendDecision {
                        should_blend: true,
                        strength,
                    });
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Some(latest.unwrap_or(BlendDecision {
                        should_blend: false,
                        strength: 0.0,
                    }));
                }
            }
        }
    }

    pub fn step(&mut self) -> Result<StepOutcome> {
        let Some(decision) = self.poll_decision() else {
            return Ok(StepOutcome::Terminated);
        };

        let (frame_a, frame_b, mask) = self.source.next_frame_pair();
        let output = self.mixer.mix(&frame_a, &frame_b, mask.as_ref(), decision)?;

        self.frames_emitted += 1;
        if decision.should_blend {
            self.frames_blended += 1;
        }

        if self.keepalive.has_period_passed() {
            info!(
                "keep-alive, elapsed {}, {} frames emitted, {} blended",
                self.keepalive.elapsed_str(),
                self.frames_emitted,
                self.frames_blended
            );
        }

        Ok(StepOutcome::Frame(output))
    }

    /// Run until the terminate sentinel arrives. The produced frames go to
    /// the display collaborator; this loop only reports statistics.
    pub fn run(&mut self) -> Result<()> {
        info!("starting stream");
        self.keepalive.start_if_not_started();
        loop {
            match self.step()? {
                StepOutcome::Terminated => break,
                StepOutcome::Frame(_) => {}
            }
            std::thread::sleep(Duration::from_millis(self.ms_between_frames));
        }
        info!(
            "stream stopped, elapsed {}, {} frames emitted, {} blended",
            self.keepalive.elapsed_str(),
            self.frames_emitted,
            self.frames_blended
        );
        Ok(())
    }
}

/// Capture-side loop: consumes audio chunks, runs the feature pipeline and
/// the actions, and forwards blend strengths over the control queue.
pub struct AudioEngine {
    processor: FeatureProcessor,
    actions: Actions,
    control: Sender<ControlMessage>,
    recorder: TimeRecorder,
    keepalive: TimeRecorder,
}

impl AudioEngine {
    pub fn new(
        processor: FeatureProcessor,
        actions: Actions,
        control: Sender<ControlMessage>,
    ) -> Self {
        Self {
            processor,
            actions,
            control,
            recorder: TimeRecorder::keepalive(),
            keepalive: TimeRecorder::keepalive(),
        }
    }

    async fn tick(&mut self, chunk: AudioChunk) -> Result<()> {
        // A hiccup in detection only costs this chunk, never the stream.
        match self.processor.process(&chunk).await {
            Ok(features) => {
                if let Err(err) = self.actions.set_features(&features) {
                    warn!("feature snapshot not applicable yet: {err}");
                }
            }
            Err(err) => warn!("detection failed for this chunk: {err}"),
        }

        let elapsed_ms = self.recorder.elapsed_ms_since_last_asked();
        let decision = self.actions.act(elapsed_ms).await?;
        if decision.should_blend
            && self
                .control
                .send(ControlMessage::BlendStrength(decision.strength))
                .is_err()
        {
            warn!("control queue closed, dropping blend strength");
        }

        if self.keepalive.has_period_passed() {
            info!("keep-alive, elapsed {}", self.keepalive.elapsed_str());
        }
        Ok(())
    }

    /// Process chunks until the source closes or `run_for` elapses, then
    /// send the terminate sentinel.
    pub async fn run(
        mut self,
        mut chunks: UnboundedReceiver<AudioChunk>,
        run_for: Option<Duration>,
    ) -> Result<()> {
        info!("starting audio engine");
        self.recorder.start_if_not_started();

        let deadline = run_for.map(|limit| tokio::time::Instant::now() + limit);
        let result = loop {
            let chunk = match deadline {
                Some(deadline) => tokio::select! {
                    chunk = chunks.recv() => chunk,
                    _ = tokio::time::sleep_until(deadline) => {
                        info!("playback time elapsed");
                        break Ok(());
                    }
                },
                None => chunks.recv().await,
            };

            let Some(chunk) = chunk else {
                info!("audio source closed");
                break Ok(());
            };
            if let Err(err) = self.tick(chunk).await {
                break Err(err);
            }
        };

        let _ = self.control.send(ControlMessage::Terminate);
        info!(
            "audio engine stopped, elapsed {}",
            self.recorder.elapsed_str()
        );
        result
    }
}
