//! Incremental live HLS/CMAF packaging core: segmentation, fragmented-MP4
//! and MPEG-TS muxing, segment-level encryption, and `#EXT-X-KEY` playlist
//! decoration.
//!
//! The crate has no network surface of its own and does not generate full
//! playlists; callers feed it an [`types::EncodedFrame`] stream, consume a
//! [`types::Segment`] stream back, and hand any playlist text they build
//! elsewhere to [`playlist::PlaylistDecorator`] for key-tag injection.

pub mod binary;
pub mod clock;
pub mod codec;
pub mod crypto;
pub mod dsp;
pub mod encryptor;
pub mod error;
pub mod isobmff;
pub mod playlist;
pub mod ring_buffer;
pub mod sample_codec;
pub mod segmenter;
pub mod ts;
pub mod types;

pub use codec::{CodecAdapter, H264Adapter, H265Adapter, Vp8Adapter, Vp9Adapter, Av1Adapter};
pub use dsp::DspConfig;
pub use encryptor::{EncryptionConfig, EncryptionMethod, SegmentEncryptor};
pub use error::{CoreError, CryptoError, MuxerError, Result, SegmenterError};
pub use playlist::PlaylistDecorator;
pub use ring_buffer::{Capacity, RingBuffer};
pub use segmenter::{PairedSegmenter, Segmenter, SegmenterConfig, SessionStats};
pub use types::{Codec, EncodedFrame, Segment, Timestamp};
