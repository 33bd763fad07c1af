//! Core data model shared by every component.

use std::collections::BTreeSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Video timescale used throughout the writer when the caller doesn't override it.
pub const DEFAULT_VIDEO_TIMESCALE: u32 = 90_000;

/// A non-negative duration/position expressed in seconds, renderable at any
/// integer `timescale` (90_000 for video, the sample rate for audio).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    /// Build a timestamp from a seconds value. Negative values are a caller
    /// bug, not a runtime condition callers are expected to recover from.
    pub fn from_secs(secs: f64) -> Self {
        debug_assert!(secs >= 0.0, "Timestamp must be non-negative, got {secs}");
        Self(secs.max(0.0))
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }

    /// Render this timestamp as an integer tick count in `timescale` units,
    /// rounding to the nearest tick.
    pub fn to_ticks(self, timescale: u32) -> u64 {
        (self.0 * f64::from(timescale)).round() as u64
    }

    pub fn checked_add(self, other: Timestamp) -> Self {
        Self(self.0 + other.0)
    }

    pub fn checked_sub(self, other: Timestamp) -> Self {
        Self((self.0 - other.0).max(0.0))
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self::from_secs(secs)
    }
}

/// Codec tag carried by an [`EncodedFrame`] and used to key sample-entry and
/// muxer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Codec {
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    Aac,
}

impl Codec {
    pub fn is_video(self) -> bool {
        !matches!(self, Codec::Aac)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Codec::Aac)
    }
}

/// An immutable, already-encoded elementary frame produced by an upstream
/// encoder/transcoder. The segmenter copies/retains the payload until the
/// enclosing segment is emitted, then releases it.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub timestamp: Timestamp,
    pub duration: Timestamp,
    pub is_keyframe: bool,
    pub codec: Codec,
}

impl EncodedFrame {
    pub fn new(
        data: Bytes,
        timestamp: Timestamp,
        duration: Timestamp,
        is_keyframe: bool,
        codec: Codec,
    ) -> Self {
        let is_keyframe = is_keyframe || codec == Codec::Aac;
        Self {
            data,
            timestamp,
            duration,
            is_keyframe,
            codec,
        }
    }
}

/// Byte range within a single-file output (offset, length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// A completed, fully-transformed media segment.
#[derive(Debug, Clone)]
pub struct Segment {
    pub index: u64,
    pub data: Bytes,
    pub duration: Timestamp,
    pub timestamp: Timestamp,
    pub is_independent: bool,
    pub byte_range: Option<ByteRange>,
    pub discontinuity: bool,
    pub is_gap: bool,
    pub program_date_time: Option<DateTime<Utc>>,
    pub filename: String,
    pub frame_count: usize,
    pub codecs: BTreeSet<Codec>,
}

/// A sub-segment unit for LL-HLS `EXT-X-PART`; identical to [`Segment`] but
/// without the `styp` prefix and addressed relative to its parent segment.
#[derive(Debug, Clone)]
pub struct PartialSegment {
    pub index: u64,
    pub data: Bytes,
    pub duration: Timestamp,
    pub is_independent: bool,
    pub is_gap: bool,
}

/// Render a filename from a naming pattern containing the literal
/// placeholder `{index}`, zero-padded to 4 digits the way the
/// `v_seg_$Number%04d$.m4s` template does elsewhere in this codebase.
pub fn render_filename(pattern: &str, index: u64) -> String {
    pattern.replace("{index}", &format!("{index:04}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_to_ticks_rounds() {
        let ts = Timestamp::from_secs(1024.0 / 48_000.0);
        assert_eq!(ts.to_ticks(48_000), 1024);
    }

    #[test]
    fn aac_frame_is_always_keyframe() {
        let f = EncodedFrame::new(
            Bytes::from_static(&[0u8; 4]),
            Timestamp::zero(),
            Timestamp::from_secs(0.02),
            false,
            Codec::Aac,
        );
        assert!(f.is_keyframe);
    }

    #[test]
    fn render_filename_pads_index() {
        assert_eq!(render_filename("v_seg_{index}.m4s", 7), "v_seg_0007.m4s");
    }
}
