use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{MixerError, Result};

/// Ephemeral per-tick output of the action aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendDecision {
    pub should_blend: bool,
    /// 1.0 exactly at trigger, decaying toward zero afterwards.
    pub strength: f32,
}

/// 8-bit interleaved pixel buffer. The blender only reads its inputs and
/// allocates one output frame per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u32, data: Vec<u8>) -> Result<Self> {
        if data.len() != (width * height * channels) as usize {
            return Err(MixerError::InvalidConfiguration(format!(
                "frame data length {} does not match {width}x{height}x{channels}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn filled(width: u32, height: u32, channels: u32, value: u8) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; (width * height * channels) as usize],
        }
    }

    fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
    }
}

/// The supported blend operations.
// Mode list follows the classic compositing set; pick is not a real blend
// mode but a bypass that always shows the second video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    Normal,
    Darken,
    Lighten,
    Multiply,
    Screen,
    Add,
    Difference,
    Pick,
}

impl std::str::FromStr for BlendMode {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(BlendMode::Normal),
            "darken" => Ok(BlendMode::Darken),
            "lighten" => Ok(BlendMode::Lighten),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "add" => Ok(BlendMode::Add),
            "difference" => Ok(BlendMode::Difference),
            "pick" => Ok(BlendMode::Pick),
            other => Err(MixerError::InvalidConfiguration(format!(
                "unknown blend mode: {other}"
            ))),
        }
    }
}

/// Pure per-pixel blender; the mode is fixed at construction.
pub struct FrameBlender {
    mode: BlendMode,
}

impl FrameBlender {
    pub fn new(mode: BlendMode) -> Self {
        info!("loaded frame blender with operation {mode:?}");
        Self { mode }
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    /// Second frame scaled by the alpha mask (when present) and the blend
    /// strength, computed in float and cast back to 8-bit once.
    fn weighted(frame_b: &Frame, alpha: Option<&Frame>, strength: f32) -> Vec<u8> {
        match alpha {
            None => frame_b
                .data
                .iter()
                .map(|&b| (b as f32 * strength) as u8)
                .collect(),
            Some(mask) => frame_b
                .data
                .iter()
                .zip(mask.data.iter())
                .map(|(&b, &a)| (b as f32 * (a as f32 / 255.0) * strength) as u8)
                .collect(),
        }
    }

    pub fn blend(
        &self,
        frame_a: &Frame,
        frame_b: &Frame,
        alpha: Option<&Frame>,
        strength: f32,
    ) -> Result<Frame> {
        if !frame_a.same_shape(frame_b) {
            return Err(MixerError::MismatchedFrames(
                frame_a.width,
                frame_a.height,
                frame_b.width,
                frame_b.height,
            ));
        }
        if let Some(mask) = alpha {
            if !frame_a.same_shape(mask) {
                return Err(MixerError::MismatchedFrames(
                    frame_a.width,
                    frame_a.height,
                    mask.width,
                    mask.height,
                ));
            }
        }

        // Pick bypasses weighting entirely.
        if self.mode == BlendMode::Pick {
            return Ok(frame_b.clone());
        }

        let weighted = Self::weighted(frame_b, alpha, strength);
        let data: Vec<u8> = frame_a
            .data
            .iter()
            .zip(weighted.iter())
            .map(|(&a, &w)| self.blend_pixel(a, w))
            .collect();

        Ok(Frame {
            width: frame_a.width,
            height: frame_a.height,
            channels: frame_a.channels,
            data,
        })
    }

    fn blend_pixel(&self, a: u8, w: u8) -> u8 {
        match self.mode {
            BlendMode::Normal => w,
            BlendMode::Darken => a.min(w),
            BlendMode::Lighten => a.max(w),
            BlendMode::Multiply => (a as f32 * w as f32 / 255.0) as u8,
            // Literal formula on the raw 0-255 domain, kept for output
            // compatibility; the float product saturates on cast.
            BlendMode::Screen => (255.0 * (1.0 - a as f32) * (1.0 - w as f32)) as u8,
            BlendMode::Add => a.saturating_add(w),
            BlendMode::Difference => (a as i16 - w as i16).unsigned_abs() as u8,
            BlendMode::Pick => unreachable!("pick short-circuits before weighting"),
        }
    }
}

/// Applies a blend decision: frame A passes through untouched unless the
/// decision says to blend.
pub struct FrameMixer {
    blender: FrameBlender,
}

impl FrameMixer {
    pub fn new(blender: FrameBlender) -> Self {
        Self { blender }
    }

    pub fn mix(
        &self,
        frame_a: &Frame,
        frame_b: &Frame,
        alpha: Option<&Frame>,
        decision: BlendDecision,
    ) -> Result<Frame> {
        if !decision.should_blend {
            return Ok(frame_a.clone());
        }
        self.blender.blend(frame_a, frame_b, alpha, decision.strength)
    }
}
