//! Uniform adapter over each supported video codec.
//!
//! Generalizes `isobmff::IsoBmffWriter`'s sample-entry construction beyond a
//! hard-coded H.264/AAC pair: each adapter watches the encoded frame stream
//! for in-band configuration (SPS/PPS, VPS, an AV1 sequence header OBU) and
//! reports when it has enough to build a `TrackConfig`. H.264/AAC remain the
//! byte-exact primary path `isobmff` tests pin; these adapters are the
//! supplementary multi-codec path.

use bytes::Bytes;

use crate::isobmff::TrackConfig;
use crate::types::{Codec, EncodedFrame, DEFAULT_VIDEO_TIMESCALE};

/// Split a length-prefixed (4-byte big-endian size) NALU/frame stream into
/// its individual units, each still carrying its own header byte(s).
fn iter_length_prefixed(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut i = 0;
    std::iter::from_fn(move || {
        if i + 4 > data.len() {
            return None;
        }
        let len = u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]) as usize;
        i += 4;
        if i + len > data.len() {
            return None;
        }
        let unit = &data[i..i + len];
        i += len;
        Some(unit)
    })
}

/// One codec's worth of muxing metadata, built incrementally as its in-band
/// parameter sets are observed on the wire. Implementors never rewrite
/// frame bytes; `convert_frame` only updates internal state.
pub trait CodecAdapter: Send {
    fn kind(&self) -> Codec;
    fn timescale(&self) -> u32;
    /// True once enough in-band configuration has been observed to build a
    /// sample entry (e.g. both SPS and PPS seen for H.264).
    fn ready(&self) -> bool;
    /// Observe one encoded frame, extracting configuration data if this
    /// adapter doesn't have it yet.
    fn convert_frame(&mut self, frame: &EncodedFrame);
    /// Build the `TrackConfig` this adapter's current state describes.
    /// `None` until `ready()`.
    fn codec_config(&self) -> Option<TrackConfig>;
    /// Short codec identifier for an HLS `CODECS=` attribute.
    fn codec_string(&self) -> Option<String>;
}

pub struct H264Adapter {
    width: u32,
    height: u32,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H264Adapter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sps: None,
            pps: None,
        }
    }
}

impl CodecAdapter for H264Adapter {
    fn kind(&self) -> Codec {
        Codec::H264
    }

    fn timescale(&self) -> u32 {
        DEFAULT_VIDEO_TIMESCALE
    }

    fn ready(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    fn convert_frame(&mut self, frame: &EncodedFrame) {
        for unit in iter_length_prefixed(&frame.data) {
            let Some(&header) = unit.first() else { continue };
            match header & 0x1F {
                7 => self.sps = Some(Bytes::copy_from_slice(unit)),
                8 => self.pps = Some(Bytes::copy_from_slice(unit)),
                _ => {}
            }
        }
    }

    fn codec_config(&self) -> Option<TrackConfig> {
        let (sps, pps) = (self.sps.as_ref()?, self.pps.as_ref()?);
        Some(TrackConfig::Video {
            width: self.width,
            height: self.height,
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        })
    }

    fn codec_string(&self) -> Option<String> {
        let sps = self.sps.as_ref()?;
        Some(format!(
            "avc1.{:02X}{:02X}{:02X}",
            sps.get(1).copied().unwrap_or(0),
            sps.get(2).copied().unwrap_or(0),
            sps.get(3).copied().unwrap_or(0),
        ))
    }
}

pub struct H265Adapter {
    width: u32,
    height: u32,
    vps: Option<Bytes>,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H265Adapter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            vps: None,
            sps: None,
            pps: None,
        }
    }
}

impl CodecAdapter for H265Adapter {
    fn kind(&self) -> Codec {
        Codec::H265
    }

    fn timescale(&self) -> u32 {
        DEFAULT_VIDEO_TIMESCALE
    }

    fn ready(&self) -> bool {
        self.vps.is_some() && self.sps.is_some() && self.pps.is_some()
    }

    fn convert_frame(&mut self, frame: &EncodedFrame) {
        for unit in iter_length_prefixed(&frame.data) {
            if unit.len() < 2 {
                continue;
            }
            match (unit[0] >> 1) & 0x3F {
                32 => self.vps = Some(Bytes::copy_from_slice(unit)),
                33 => self.sps = Some(Bytes::copy_from_slice(unit)),
                34 => self.pps = Some(Bytes::copy_from_slice(unit)),
                _ => {}
            }
        }
    }

    fn codec_config(&self) -> Option<TrackConfig> {
        let (vps, sps, pps) = (self.vps.as_ref()?, self.sps.as_ref()?, self.pps.as_ref()?);
        Some(TrackConfig::Hevc {
            width: self.width,
            height: self.height,
            vps: vps.to_vec(),
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        })
    }

    fn codec_string(&self) -> Option<String> {
        self.ready().then(|| "hev1.1.6.L93.B0".to_string())
    }
}

pub struct Vp8Adapter {
    width: u32,
    height: u32,
    seen_frame: bool,
}

impl Vp8Adapter {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seen_frame: false,
        }
    }
}

impl CodecAdapter for Vp8Adapter {
    fn kind(&self) -> Codec {
        Codec::Vp8
    }

    fn timescale(&self) -> u32 {
        DEFAULT_VIDEO_TIMESCALE
    }

    fn ready(&self) -> bool {
        self.seen_frame
    }

    fn convert_frame(&mut self, _frame: &EncodedFrame) {
        // VP8 carries no out-of-band configuration beyond width/height,
        // already known at construction; any frame marks the track ready.
        self.seen_frame = true;
    }

    fn codec_config(&self) -> Option<TrackConfig> {
        self.seen_frame.then_some(TrackConfig::Vp8 {
            width: self.width,
            height: self.height,
        })
    }

    fn codec_string(&self) -> Option<String> {
        self.seen_frame.then(|| "vp08.00.10.08".to_string())
    }
}

pub struct Vp9Adapter {
    width: u32,
    height: u32,
    profile: u8,
    bit_depth: u8,
    seen_frame: bool,
}

impl Vp9Adapter {
    pub fn new(width: u32, height: u32, profile: u8, bit_depth: u8) -> Self {
        Self {
            width,
            height,
            profile,
            bit_depth,
            seen_frame: false,
        }
    }
}

impl CodecAdapter for Vp9Adapter {
    fn kind(&self) -> Codec {
        Codec::Vp9
    }

    fn timescale(&self) -> u32 {
        DEFAULT_VIDEO_TIMESCALE
    }

    fn ready(&self) -> bool {
        self.seen_frame
    }

    fn convert_frame(&mut self, _frame: &EncodedFrame) {
        self.seen_frame = true;
    }

    fn codec_config(&self) -> Option<TrackConfig> {
        self.seen_frame.then_some(TrackConfig::Vp9 {
            width: self.width,
            height: self.height,
            profile: self.profile,
            bit_depth: self.bit_depth,
        })
    }

    fn codec_string(&self) -> Option<String> {
        self.seen_frame
            .then(|| format!("vp09.{:02}.10.{:02}", self.profile, self.bit_depth))
    }
}

pub struct Av1Adapter {
    width: u32,
    height: u32,
    seq_profile: u8,
    seq_level_idx: u8,
    seq_tier: u8,
    sequence_header_obu: Option<Bytes>,
}

impl Av1Adapter {
    pub fn new(width: u32, height: u32, seq_profile: u8, seq_level_idx: u8, seq_tier: u8) -> Self {
        Self {
            width,
            height,
            seq_profile,
            seq_level_idx,
            seq_tier,
            sequence_header_obu: None,
        }
    }
}

impl CodecAdapter for Av1Adapter {
    fn kind(&self) -> Codec {
        Codec::Av1
    }

    fn timescale(&self) -> u32 {
        DEFAULT_VIDEO_TIMESCALE
    }

    fn ready(&self) -> bool {
        self.sequence_header_obu.is_some()
    }

    fn convert_frame(&mut self, frame: &EncodedFrame) {
        if self.sequence_header_obu.is_some() {
            return;
        }
        // Sequence header OBU type is 1, in the top 4 bits of the first byte
        // after the 1-bit forbidden bit: (byte >> 3) & 0x0F.
        for unit in iter_length_prefixed(&frame.data) {
            let Some(&header) = unit.first() else { continue };
            if (header >> 3) & 0x0F == 1 {
                self.sequence_header_obu = Some(Bytes::copy_from_slice(unit));
                return;
            }
        }
    }

    fn codec_config(&self) -> Option<TrackConfig> {
        let obu = self.sequence_header_obu.as_ref()?;
        Some(TrackConfig::Av1 {
            width: self.width,
            height: self.height,
            seq_profile: self.seq_profile,
            seq_level_idx: self.seq_level_idx,
            seq_tier: self.seq_tier,
            sequence_header_obu: obu.to_vec(),
        })
    }

    fn codec_string(&self) -> Option<String> {
        self.ready()
            .then(|| format!("av01.{}.{:02}{}.08", self.seq_profile, self.seq_level_idx, if self.seq_tier == 0 { "M" } else { "H" }))
    }
}
