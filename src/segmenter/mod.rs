//! Incremental segmentation actor.
//!
//! Follows the actor shape used elsewhere in this codebase for long-lived
//! mutable state behind an async lock (`stream::source::SourceManager` wraps
//! its state in `Arc<tokio::sync::Mutex<_>>` and exposes `async fn`
//! operations that acquire it for the whole call; `forward::bridge`
//! publishes events over an unbounded `mpsc` channel), generalised here to
//! segment cutting instead of RTP forwarding.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::SegmenterError;
use crate::ring_buffer::{Capacity, RingBuffer};
use crate::types::{render_filename, ByteRange, Codec, EncodedFrame, Segment, Timestamp};

/// A per-segment transform hook: wraps the raw concatenated frame bytes into
/// a container (fMP4 `styp/moof/mdat`, MPEG-TS, or passthrough). Returns the
/// final bytes to publish as `Segment.data`.
pub type SegmentTransform =
    Arc<dyn Fn(u64, &[EncodedFrame]) -> crate::Result<bytes::Bytes> + Send + Sync>;

fn default_target_duration() -> Timestamp {
    Timestamp::from_secs(6.0)
}

fn default_max_duration() -> Timestamp {
    Timestamp::from_secs(9.0)
}

fn default_naming_pattern() -> String {
    "seg_{index}.m4s".to_string()
}

fn default_keyframe_request_backoff() -> Timestamp {
    Timestamp::from_secs(2.0)
}

/// Closed set of segmenter options. Mirrors the `#[serde(default)]`/
/// `default_*()` shape the rest of this codebase's `config.rs` uses for
/// `Log`/`Auth`/`Webhook`, so a caller can load these parameters from the
/// same TOML/JSON file shape the rest of the pipeline already does. Loading
/// the file itself is the caller's job; this crate only deserializes.
#[derive(Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    #[serde(default = "default_target_duration")]
    pub target_duration: Timestamp,
    #[serde(default = "default_max_duration")]
    pub max_duration: Timestamp,
    #[serde(default)]
    pub ring_buffer_size: Capacity,
    #[serde(default)]
    pub keyframe_aligned: bool,
    #[serde(default)]
    pub start_index: u64,
    #[serde(default)]
    pub track_program_date_time: bool,
    #[serde(default = "default_naming_pattern")]
    pub naming_pattern: String,
    /// Minimum spacing between `should_request_keyframe` turning true again
    /// after a request is recorded.
    #[serde(default = "default_keyframe_request_backoff")]
    pub keyframe_request_backoff: Timestamp,
    #[serde(skip)]
    pub transform: Option<SegmentTransform>,
}

impl SegmenterConfig {
    /// `max_duration` defaults to `1.5 * target_duration` when unset.
    pub fn new(target_duration: Timestamp, keyframe_aligned: bool, naming_pattern: impl Into<String>) -> Self {
        Self {
            target_duration,
            max_duration: Timestamp::from_secs(target_duration.seconds() * 1.5),
            ring_buffer_size: Capacity::Bounded(0),
            keyframe_aligned,
            start_index: 0,
            track_program_date_time: false,
            naming_pattern: naming_pattern.into(),
            keyframe_request_backoff: default_keyframe_request_backoff(),
            transform: None,
        }
    }
}

/// Running totals for DASH-shaped manifest statistics (`SegmentTimeline`
/// duration/bandwidth fields), accumulated the same way `write_manifest`
/// tracks bitrate/frame-rate across emitted segments elsewhere in this
/// codebase. Pure bookkeeping; it never feeds back into cut decisions.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub segments_emitted: u64,
    pub total_bytes: u64,
    pub total_duration: f64,
    pub total_frames: u64,
    pub codecs: BTreeSet<Codec>,
}

impl SessionStats {
    fn record(&mut self, segment: &Segment) {
        self.segments_emitted += 1;
        self.total_bytes += segment.data.len() as u64;
        self.total_duration += segment.duration.seconds();
        self.total_frames += segment.frame_count as u64;
        self.codecs.extend(segment.codecs.iter().copied());
    }

    /// Average bitrate across every segment emitted so far, in bits/sec.
    pub fn average_bitrate_bps(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        (self.total_bytes as f64 * 8.0) / self.total_duration
    }

    /// Average frame rate across every segment emitted so far.
    pub fn average_frame_rate(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        self.total_frames as f64 / self.total_duration
    }
}

struct CurrentSegment {
    frames: Vec<EncodedFrame>,
    duration: Timestamp,
    timestamp: Timestamp,
    codecs: BTreeSet<Codec>,
    start_date: Option<chrono::DateTime<chrono::Utc>>,
}

impl CurrentSegment {
    fn empty() -> Self {
        Self {
            frames: Vec::new(),
            duration: Timestamp::zero(),
            timestamp: Timestamp::zero(),
            codecs: BTreeSet::new(),
            start_date: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

struct State {
    current: CurrentSegment,
    next_segment_index: u64,
    last_timestamp: Option<Timestamp>,
    finished: bool,
    ring_buffer: RingBuffer,
    last_keyframe_at: Option<Timestamp>,
    last_keyframe_request_at: Option<Timestamp>,
    stats: SessionStats,
}

/// A single-writer segmentation actor. All mutating
/// operations acquire `state` for the full call; there is no internal
/// multi-threading.
pub struct Segmenter {
    config: SegmenterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    total_emitted: AtomicUsize,
    tx: mpsc::UnboundedSender<Segment>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> (Self, mpsc::UnboundedReceiver<Segment>) {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SegmenterConfig, clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<Segment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ring_buffer = RingBuffer::new(config.ring_buffer_size);
        let segmenter = Self {
            state: Mutex::new(State {
                current: CurrentSegment::empty(),
                next_segment_index: config.start_index,
                last_timestamp: None,
                finished: false,
                ring_buffer,
                last_keyframe_at: None,
                last_keyframe_request_at: None,
                stats: SessionStats::default(),
            }),
            config,
            clock,
            total_emitted: AtomicUsize::new(0),
            tx,
        };
        (segmenter, rx)
    }

    pub fn total_emitted(&self) -> usize {
        self.total_emitted.load(Ordering::Acquire)
    }

    fn should_cut(&self, frame: &EncodedFrame) -> bool {
        !self.config.keyframe_aligned || (frame.is_keyframe && frame.codec.is_video())
    }

    /// Ingest one frame, possibly cutting and emitting a completed segment.
    pub async fn ingest(&self, frame: EncodedFrame) -> Result<(), SegmenterError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(SegmenterError::NotActive);
        }
        if let Some(last) = state.last_timestamp {
            if frame.timestamp < last {
                return Err(SegmenterError::NonMonotonicTimestamp {
                    last: last.seconds(),
                    got: frame.timestamp.seconds(),
                });
            }
        }
        state.last_timestamp = Some(frame.timestamp);
        if frame.is_keyframe && frame.codec.is_video() {
            state.last_keyframe_at = Some(frame.timestamp);
        }

        if state.current.is_empty() {
            state.current.timestamp = frame.timestamp;
            if self.config.track_program_date_time {
                state.current.start_date = Some(self.clock.now());
            }
        }

        let prospective_duration = state.current.duration.checked_add(frame.duration);
        let would_exceed_target = prospective_duration.seconds() >= self.config.target_duration.seconds();
        let would_exceed_max = prospective_duration.seconds() >= self.config.max_duration.seconds();

        if would_exceed_target && self.should_cut(&frame) {
            self.emit_locked(&mut state);
            state.current.timestamp = frame.timestamp;
            if self.config.track_program_date_time {
                state.current.start_date = Some(self.clock.now());
            }
            self.append_locked(&mut state, frame);
            return Ok(());
        }

        if would_exceed_max && !state.current.is_empty() {
            self.append_locked(&mut state, frame);
            self.emit_locked(&mut state);
            return Ok(());
        }

        self.append_locked(&mut state, frame);
        Ok(())
    }

    fn append_locked(&self, state: &mut State, frame: EncodedFrame) {
        state.current.duration = state.current.duration.checked_add(frame.duration);
        state.current.codecs.insert(frame.codec);
        state.current.frames.push(frame);
    }

    /// Force a cut of whatever is currently pending.
    pub async fn force_segment_boundary(&self) -> Result<(), SegmenterError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Err(SegmenterError::NotActive);
        }
        if state.current.is_empty() {
            return Err(SegmenterError::NoFramesPending);
        }
        self.emit_locked(&mut state);
        Ok(())
    }

    /// Idempotent: emits any pending frames as a final (possibly short)
    /// segment, marks the segmenter finished, and closes the output channel.
    pub async fn finish(&self) -> Option<Segment> {
        let mut state = self.state.lock().await;
        if state.finished {
            return None;
        }
        state.finished = true;
        let last = if !state.current.is_empty() {
            Some(self.emit_locked(&mut state))
        } else {
            None
        };
        last
    }

    /// Build and publish the current segment, returning the emitted value.
    fn emit_locked(&self, state: &mut State) -> Segment {
        let current = std::mem::replace(&mut state.current, CurrentSegment::empty());
        let index = state.next_segment_index;
        state.next_segment_index += 1;

        let is_independent = current
            .frames
            .first()
            .map(|f| f.is_keyframe)
            .unwrap_or(true);

        let raw: bytes::Bytes = {
            let mut buf = bytes::BytesMut::new();
            for frame in &current.frames {
                buf.extend_from_slice(&frame.data);
            }
            buf.freeze()
        };

        let data = match &self.config.transform {
            Some(transform) => match transform(index, &current.frames) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(%index, error = %err, "[segmenter] transform failed, publishing raw payload");
                    raw
                }
            },
            None => raw,
        };

        let segment = Segment {
            index,
            byte_range: None::<ByteRange>,
            duration: current.duration,
            timestamp: current.timestamp,
            is_independent,
            discontinuity: false,
            is_gap: false,
            program_date_time: current.start_date,
            filename: render_filename(&self.config.naming_pattern, index),
            frame_count: current.frames.len(),
            codecs: current.codecs,
            data,
        };

        trace!(index, frames = segment.frame_count, duration = segment.duration.seconds(), "[segmenter] emitting segment");
        state.stats.record(&segment);
        state.ring_buffer.push(segment.clone());
        self.total_emitted.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(segment.clone()).is_err() {
            debug!(index, "[segmenter] segment receiver dropped, continuing to produce");
        }
        segment
    }

    pub async fn buffered_segment_count(&self) -> usize {
        self.state.lock().await.ring_buffer.len()
    }

    pub async fn get_buffered(&self, index: u64) -> Option<Segment> {
        self.state.lock().await.ring_buffer.get(index).cloned()
    }

    /// A snapshot of the running DASH-shaped statistics accumulated from
    /// every segment emitted so far.
    pub async fn session_stats(&self) -> SessionStats {
        self.state.lock().await.stats.clone()
    }

    /// True when no keyframe has been recorded recently enough, and the
    /// last request (if any) is far enough in the past that issuing another
    /// one would not flood the upstream encoder. Mirrors the backoff a PLI
    /// sender uses against RTCP feedback storms, generalized to whatever
    /// out-of-band signalling the caller transports the request over.
    pub async fn should_request_keyframe(&self, now: Timestamp) -> bool {
        let state = self.state.lock().await;
        match state.last_keyframe_request_at {
            None => true,
            Some(last) => now.checked_sub(last).seconds() >= self.config.keyframe_request_backoff.seconds(),
        }
    }

    /// Record that a keyframe request was just issued at `now`, starting the
    /// backoff window `should_request_keyframe` honors.
    pub async fn record_keyframe_request(&self, now: Timestamp) {
        self.state.lock().await.last_keyframe_request_at = Some(now);
    }
}

mod paired;
pub use paired::{PairedSegmenter, SegmentOutput};

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(ts: f64, dur: f64, keyframe: bool, codec: Codec) -> EncodedFrame {
        EncodedFrame::new(Bytes::from_static(&[0u8; 4]), Timestamp::from_secs(ts), Timestamp::from_secs(dur), keyframe, codec)
    }

    #[tokio::test]
    async fn audio_only_cuts_on_target_duration() {
        let config = SegmenterConfig::new(Timestamp::from_secs(0.5), false, "a_{index}.aac");
        let (segmenter, mut rx) = Segmenter::new(config);

        let frame_dur = 1024.0 / 48_000.0;
        for i in 0..100 {
            segmenter
                .ingest(frame(i as f64 * frame_dur, frame_dur, false, Codec::Aac))
                .await
                .unwrap();
        }
        segmenter.finish().await;

        let mut segments = Vec::new();
        while let Ok(seg) = rx.try_recv() {
            segments.push(seg);
        }
        assert!(segments.len() >= 4);
        let total: f64 = segments.iter().map(|s| s.duration.seconds()).sum();
        assert!((total - 100.0 * frame_dur).abs() < 1e-6);
        for seg in &segments {
            assert_eq!(seg.codecs, BTreeSet::from([Codec::Aac]));
            assert!(seg.is_independent);
        }
    }

    #[tokio::test]
    async fn video_keyframe_aligned_cuts_on_gop() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), true, "v_{index}.m4s");
        let (segmenter, mut rx) = Segmenter::new(config);

        for gop in 0..3u64 {
            for i in 0..30u64 {
                let ts = (gop * 30 + i) as f64 / 30.0;
                let keyframe = i == 0;
                segmenter.ingest(frame(ts, 1.0 / 30.0, keyframe, Codec::H264)).await.unwrap();
            }
        }
        segmenter.finish().await;

        let mut segments = Vec::new();
        while let Ok(seg) = rx.try_recv() {
            segments.push(seg);
        }
        assert_eq!(segments.len(), 3);
        for seg in &segments {
            assert!(seg.is_independent);
        }
    }

    #[tokio::test]
    async fn forced_max_duration_cut_without_keyframe() {
        let mut config = SegmenterConfig::new(Timestamp::from_secs(1.0), true, "v_{index}.m4s");
        config.max_duration = Timestamp::from_secs(1.5);
        let (segmenter, mut rx) = Segmenter::new(config);

        for i in 0..60u64 {
            let ts = i as f64 / 30.0;
            let keyframe = i == 0;
            segmenter.ingest(frame(ts, 1.0 / 30.0, keyframe, Codec::H264)).await.unwrap();
        }

        let seg = rx.try_recv().expect("forced cut should have emitted a segment");
        assert!(!seg.is_independent);
        assert_eq!(seg.frame_count, 45);
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), false, "a_{index}.aac");
        let (segmenter, _rx) = Segmenter::new(config);
        segmenter.ingest(frame(0.0, 0.1, true, Codec::Aac)).await.unwrap();
        assert!(segmenter.finish().await.is_some());
        assert!(segmenter.finish().await.is_none());
    }

    #[tokio::test]
    async fn ingest_after_finish_fails() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), false, "a_{index}.aac");
        let (segmenter, _rx) = Segmenter::new(config);
        segmenter.finish().await;
        let err = segmenter.ingest(frame(0.0, 0.1, true, Codec::Aac)).await.unwrap_err();
        assert!(matches!(err, SegmenterError::NotActive));
    }

    #[tokio::test]
    async fn non_monotonic_timestamp_rejected() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), false, "a_{index}.aac");
        let (segmenter, _rx) = Segmenter::new(config);
        segmenter.ingest(frame(1.0, 0.1, true, Codec::Aac)).await.unwrap();
        let err = segmenter.ingest(frame(0.5, 0.1, true, Codec::Aac)).await.unwrap_err();
        assert!(matches!(err, SegmenterError::NonMonotonicTimestamp { .. }));
    }

    #[tokio::test]
    async fn force_segment_boundary_requires_pending_frames() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), false, "a_{index}.aac");
        let (segmenter, _rx) = Segmenter::new(config);
        let err = segmenter.force_segment_boundary().await.unwrap_err();
        assert!(matches!(err, SegmenterError::NoFramesPending));
    }

    #[tokio::test]
    async fn keyframe_request_respects_backoff() {
        let mut config = SegmenterConfig::new(Timestamp::from_secs(1.0), true, "v_{index}.m4s");
        config.keyframe_request_backoff = Timestamp::from_secs(2.0);
        let (segmenter, _rx) = Segmenter::new(config);

        assert!(segmenter.should_request_keyframe(Timestamp::from_secs(0.0)).await);
        segmenter.record_keyframe_request(Timestamp::from_secs(0.0)).await;
        assert!(!segmenter.should_request_keyframe(Timestamp::from_secs(1.0)).await);
        assert!(segmenter.should_request_keyframe(Timestamp::from_secs(2.5)).await);
    }

    #[tokio::test]
    async fn session_stats_accumulate_across_segments() {
        let config = SegmenterConfig::new(Timestamp::from_secs(1.0), true, "v_{index}.m4s");
        let (segmenter, mut rx) = Segmenter::new(config);

        for gop in 0..2u64 {
            for i in 0..30u64 {
                let ts = (gop * 30 + i) as f64 / 30.0;
                segmenter.ingest(frame(ts, 1.0 / 30.0, i == 0, Codec::H264)).await.unwrap();
            }
        }
        segmenter.finish().await;
        while rx.try_recv().is_ok() {}

        let stats = segmenter.session_stats().await;
        assert_eq!(stats.segments_emitted, 2);
        assert_eq!(stats.total_frames, 60);
        assert!(stats.average_frame_rate() > 0.0);
        assert_eq!(stats.codecs, BTreeSet::from([Codec::H264]));
    }

    #[test]
    fn segmenter_config_deserializes_with_defaults() {
        let config: SegmenterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.target_duration.seconds(), 6.0);
        assert_eq!(config.max_duration.seconds(), 9.0);
        assert!(!config.keyframe_aligned);
        assert_eq!(config.naming_pattern, "seg_{index}.m4s");
        assert_eq!(config.keyframe_request_backoff.seconds(), 2.0);
    }
}
