//! Paired video+audio segmenter.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::clock::Clock;
use crate::error::SegmenterError;
use crate::types::{Codec, EncodedFrame, Segment};

use super::{Segmenter, SegmenterConfig};

/// One aligned pair of segments published together, plus the shared cut index.
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub video: Segment,
    pub audio: Option<Segment>,
    pub index: u64,
}

/// Holds an independent video sub-segmenter (keyframe-aligned) and an
/// optional audio sub-segmenter (duration-aligned), forcing audio to cut
/// whenever video cuts so the two streams stay aligned.
pub struct PairedSegmenter {
    video: Segmenter,
    video_rx: mpsc::UnboundedReceiver<Segment>,
    audio: Option<Segmenter>,
    audio_rx: Option<mpsc::UnboundedReceiver<Segment>>,
    tx: mpsc::UnboundedSender<SegmentOutput>,
    next_index: u64,
}

impl PairedSegmenter {
    pub fn new(
        video_config: SegmenterConfig,
        audio_config: Option<SegmenterConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<SegmentOutput>) {
        Self::with_clock(video_config, audio_config, Arc::new(crate::clock::SystemClock))
    }

    pub fn with_clock(
        video_config: SegmenterConfig,
        audio_config: Option<SegmenterConfig>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<SegmentOutput>) {
        let (video, video_rx) = Segmenter::with_clock(video_config, clock.clone());
        let (audio, audio_rx) = match audio_config {
            Some(cfg) => {
                let (s, r) = Segmenter::with_clock(cfg, clock);
                (Some(s), Some(r))
            }
            None => (None, None),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let paired = Self {
            video,
            video_rx,
            audio,
            audio_rx,
            tx,
            next_index: 0,
        };
        (paired, rx)
    }

    pub async fn ingest_video(&mut self, frame: EncodedFrame) -> Result<(), SegmenterError> {
        if !frame.codec.is_video() {
            return Err(SegmenterError::InvalidConfiguration(format!(
                "ingest_video received non-video codec {:?}",
                frame.codec
            )));
        }
        let emitted_before = self.video.total_emitted();
        self.video.ingest(frame).await?;
        if self.video.total_emitted() > emitted_before {
            if let Some(audio) = &self.audio {
                match audio.force_segment_boundary().await {
                    Ok(()) => {}
                    Err(SegmenterError::NoFramesPending) => {
                        trace!("[segmenter] audio force-cut swallowed: no frames pending");
                    }
                    Err(err) => return Err(err),
                }
            }
            self.publish().await;
        }
        Ok(())
    }

    pub async fn ingest_audio(&mut self, frame: EncodedFrame) -> Result<(), SegmenterError> {
        if !frame.codec.is_audio() {
            return Err(SegmenterError::InvalidConfiguration(format!(
                "ingest_audio received non-audio codec {:?}",
                frame.codec
            )));
        }
        let audio = self
            .audio
            .as_ref()
            .ok_or_else(|| SegmenterError::InvalidConfiguration("no audio sub-segmenter configured".into()))?;
        audio.ingest(frame).await
    }

    async fn publish(&mut self) {
        while let Ok(video) = self.video_rx.try_recv() {
            let audio = if let Some(rx) = &mut self.audio_rx {
                rx.try_recv().ok()
            } else {
                None
            };
            let output = SegmentOutput {
                index: self.next_index,
                video,
                audio,
            };
            self.next_index += 1;
            let _ = self.tx.send(output);
        }
    }

    /// Closes both sub-segmenters and emits a final aligned pair.
    pub async fn finish(&mut self) -> Option<SegmentOutput> {
        let final_video = self.video.finish().await;
        let final_audio = match &self.audio {
            Some(audio) => audio.finish().await,
            None => None,
        };
        self.publish().await;

        final_video.map(|video| {
            let output = SegmentOutput {
                index: self.next_index,
                video,
                audio: final_audio,
            };
            self.next_index += 1;
            output
        })
    }
}
