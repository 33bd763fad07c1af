//! Fragmented-MP4/CMAF writer.
//!
//! Grounded on `recorder/fmp4.rs`'s `Fmp4Writer`: one writer per track
//! (never a combined audio+video `moov`, matching the split video/audio
//! writer instances in `segmenter.rs`), the same init-segment/fragment
//! split, and the same two-pass `trun.data_offset` fix-up technique,
//! generalized to this crate's byte-exact box layout (brand strings, flag
//! values, `esds`/AAC support).

mod boxes;
mod esds;

pub use esds::AacObjectType;

use bytes::Bytes;

use crate::binary::{self, BinaryWriter};
use crate::error::MuxerError;

/// Per-track configuration fixed for the lifetime of a writer.
///
/// `Video` (avc1/avcC) and `Audio` (mp4a/esds) are the byte-exact primary
/// path the tests above pin. `Hevc`/`Vp8`/`Vp9`/`Av1` generalize the same
/// sample-entry construction to the other codecs `CodecAdapter` exposes;
/// they are not held to the same byte-exact pinning.
#[derive(Debug, Clone)]
pub enum TrackConfig {
    Video {
        width: u32,
        height: u32,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Hevc {
        width: u32,
        height: u32,
        vps: Vec<u8>,
        sps: Vec<u8>,
        pps: Vec<u8>,
    },
    Vp8 {
        width: u32,
        height: u32,
    },
    Vp9 {
        width: u32,
        height: u32,
        profile: u8,
        bit_depth: u8,
    },
    Av1 {
        width: u32,
        height: u32,
        seq_profile: u8,
        seq_level_idx: u8,
        seq_tier: u8,
        sequence_header_obu: Vec<u8>,
    },
    Audio {
        channels: u16,
        sample_rate: u32,
        object_type: AacObjectType,
    },
}

impl TrackConfig {
    fn is_video(&self) -> bool {
        !matches!(self, TrackConfig::Audio { .. })
    }

    fn dimensions(&self) -> (u32, u32) {
        match self {
            TrackConfig::Video { width, height, .. }
            | TrackConfig::Hevc { width, height, .. }
            | TrackConfig::Vp8 { width, height }
            | TrackConfig::Vp9 { width, height, .. }
            | TrackConfig::Av1 { width, height, .. } => (*width, *height),
            TrackConfig::Audio { .. } => (0, 0),
        }
    }
}

/// One media sample ready to be placed in a fragment's `mdat`. `data` is
/// already in the track's native on-disk form: length-prefixed NALUs for
/// video, raw ADTS/AAC for audio.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    /// Sample duration in the track's timescale.
    pub duration_ticks: u32,
    pub is_keyframe: bool,
}

/// Builds the init segment and media fragments for a single track.
pub struct IsoBmffWriter {
    track_id: u32,
    timescale: u32,
    config: TrackConfig,
}

impl IsoBmffWriter {
    pub fn new(track_id: u32, timescale: u32, config: TrackConfig) -> Self {
        Self {
            track_id,
            timescale,
            config,
        }
    }

    pub fn is_video(&self) -> bool {
        self.config.is_video()
    }

    /// Build the standalone `ftyp + moov` init segment.
    pub fn build_init_segment(&self) -> Result<Bytes, MuxerError> {
        let ftyp = boxes::build_ftyp_moov(b"cmfc", &[b"cmfc", b"iso6", b"isom"])?;
        let moov = self.build_moov()?;
        let mut out = Vec::with_capacity(ftyp.len() + moov.len());
        out.extend_from_slice(&ftyp);
        out.extend_from_slice(&moov);
        Ok(Bytes::from(out))
    }

    fn build_moov(&self) -> Result<Vec<u8>, MuxerError> {
        let mvhd = boxes::build_mvhd(self.timescale, self.track_id + 1)?;
        let trak = self.build_trak()?;
        let mvex = boxes::build_mvex(self.track_id)?;
        binary::write_container(b"moov", &[mvhd, trak, mvex])
    }

    fn build_trak(&self) -> Result<Vec<u8>, MuxerError> {
        let (width, height) = self.config.dimensions();
        let tkhd = boxes::build_tkhd(self.track_id, width, height)?;
        let mdia = self.build_mdia()?;
        binary::write_container(b"trak", &[tkhd, mdia])
    }

    fn build_mdia(&self) -> Result<Vec<u8>, MuxerError> {
        let mdhd = boxes::build_mdhd(self.timescale)?;
        let hdlr = if self.is_video() {
            boxes::build_hdlr(b"vide", b"VideoHandler\0")?
        } else {
            boxes::build_hdlr(b"soun", b"SoundHandler\0")?
        };
        let minf = self.build_minf()?;
        binary::write_container(b"mdia", &[mdhd, hdlr, minf])
    }

    fn build_minf(&self) -> Result<Vec<u8>, MuxerError> {
        let header = if self.is_video() {
            boxes::build_vmhd()?
        } else {
            boxes::build_smhd()?
        };
        let dinf = boxes::build_dinf()?;
        let stbl = self.build_stbl()?;
        binary::write_container(b"minf", &[header, dinf, stbl])
    }

    fn build_stbl(&self) -> Result<Vec<u8>, MuxerError> {
        let stsd = self.build_stsd()?;
        let stts = boxes::build_empty_stts_stsc_stco(b"stts")?;
        let stsc = boxes::build_empty_stts_stsc_stco(b"stsc")?;
        let stsz = boxes::build_empty_stsz()?;
        let stco = boxes::build_empty_stts_stsc_stco(b"stco")?;
        binary::write_container(b"stbl", &[stsd, stts, stsc, stsz, stco])
    }

    fn build_stsd(&self) -> Result<Vec<u8>, MuxerError> {
        let entry = match &self.config {
            TrackConfig::Video {
                width,
                height,
                sps,
                pps,
            } => {
                let avcc = boxes::build_avcc(sps, pps)?;
                boxes::build_avc1_sample_entry(*width, *height, &avcc)?
            }
            TrackConfig::Hevc {
                width,
                height,
                vps,
                sps,
                pps,
            } => {
                let hvcc = boxes::build_hvcc(vps, sps, pps)?;
                boxes::build_hev1_sample_entry(*width, *height, &hvcc)?
            }
            TrackConfig::Vp8 { width, height } => {
                let vpcc = boxes::build_vpcc(0, 0, 8)?;
                boxes::build_vpx_sample_entry(b"vp08", *width, *height, &vpcc)?
            }
            TrackConfig::Vp9 {
                width,
                height,
                profile,
                bit_depth,
            } => {
                let vpcc = boxes::build_vpcc(*profile, 0, *bit_depth)?;
                boxes::build_vpx_sample_entry(b"vp09", *width, *height, &vpcc)?
            }
            TrackConfig::Av1 {
                width,
                height,
                seq_profile,
                seq_level_idx,
                seq_tier,
                sequence_header_obu,
            } => {
                let av1c = boxes::build_av1c(*seq_profile, *seq_level_idx, *seq_tier, sequence_header_obu)?;
                boxes::build_av01_sample_entry(*width, *height, &av1c)?
            }
            TrackConfig::Audio {
                channels,
                sample_rate,
                object_type,
            } => esds::build_mp4a_sample_entry(self.track_id, *channels, *sample_rate, *object_type)?,
        };
        let mut p = BinaryWriter::new();
        p.u32(1); // entry_count
        p.bytes(&entry);
        binary::write_full_box(b"stsd", 0, 0, p.as_slice())
    }

    /// Build `moof + mdat` (or `styp + moof + mdat` for a standalone media
    /// segment). `base_media_decode_time` is in the track's timescale.
    fn build_fragment(
        &self,
        include_styp: bool,
        sequence_number: u32,
        base_media_decode_time: u64,
        samples: &[Sample],
    ) -> Result<Bytes, MuxerError> {
        let moof = self.build_moof(sequence_number, base_media_decode_time, samples)?;
        let mdat = self.build_mdat(samples)?;

        let mut out = Vec::with_capacity(moof.len() + mdat.len() + 24);
        if include_styp {
            out.extend_from_slice(&boxes::build_styp()?);
        }
        out.extend_from_slice(&moof);
        out.extend_from_slice(&mdat);
        Ok(Bytes::from(out))
    }

    pub fn build_media_segment(
        &self,
        sequence_number: u32,
        base_media_decode_time: u64,
        samples: &[Sample],
    ) -> Result<Bytes, MuxerError> {
        self.build_fragment(true, sequence_number, base_media_decode_time, samples)
    }

    pub fn build_partial_segment(
        &self,
        sequence_number: u32,
        base_media_decode_time: u64,
        samples: &[Sample],
    ) -> Result<Bytes, MuxerError> {
        self.build_fragment(false, sequence_number, base_media_decode_time, samples)
    }

    fn build_mdat(&self, samples: &[Sample]) -> Result<Vec<u8>, MuxerError> {
        let total: usize = samples.iter().map(|s| s.data.len()).sum();
        let mut payload = Vec::with_capacity(total);
        for s in samples {
            payload.extend_from_slice(&s.data);
        }
        binary::write_box(b"mdat", &payload)
    }

    fn build_moof(
        &self,
        sequence_number: u32,
        base_media_decode_time: u64,
        samples: &[Sample],
    ) -> Result<Vec<u8>, MuxerError> {
        let mfhd = binary::write_full_box(b"mfhd", 0, 0, &sequence_number.to_be_bytes())?;
        let tfhd = binary::write_full_box(b"tfhd", 0, 0x020000, &self.track_id.to_be_bytes())?;
        let tfdt = binary::write_full_box(b"tfdt", 1, 0, &base_media_decode_time.to_be_bytes())?;
        let mut trun = self.build_trun(samples)?;

        let traf = binary::write_container(b"traf", &[tfhd.clone(), tfdt.clone(), trun.clone()])?;
        let mut moof = binary::write_container(b"moof", &[mfhd.clone(), traf])?;

        // Two-pass data_offset fix-up: data_offset is the byte
        // distance from the moof start to the first mdat payload byte,
        // which is moof.len() + 8 (the mdat box header).
        let data_offset = (moof.len() + 8) as i32;
        let offset_in_trun = trun_data_offset_position();
        binary::patch_i32(&mut trun, offset_in_trun, data_offset);

        // Re-wrap with the patched trun; traf/moof sizes are unchanged by
        // the patch (same byte count), so this just rewrites the same span.
        let traf = binary::write_container(b"traf", &[tfhd, tfdt, trun])?;
        moof = binary::write_container(b"moof", &[mfhd, traf])?;
        Ok(moof)
    }

    fn build_trun(&self, samples: &[Sample]) -> Result<Vec<u8>, MuxerError> {
        let is_video = self.is_video();
        // data-offset-present | sample-duration-present | sample-size-present
        let mut flags: u32 = 0x000301;
        if is_video {
            flags |= 0x000400; // sample-flags-present
        }

        let mut p = BinaryWriter::new();
        p.u32(samples.len() as u32);
        p.u32(0); // data_offset placeholder, patched by the caller
        for s in samples {
            p.u32(s.duration_ticks);
            p.u32(s.data.len() as u32);
            if is_video {
                let sample_flags: u32 = if s.is_keyframe {
                    0x0200_0000
                } else {
                    0x0101_0000
                };
                p.u32(sample_flags);
            }
        }
        binary::write_full_box(b"trun", 0, flags, p.as_slice())
    }
}

/// Byte offset of `data_offset` within a serialized `trun` box: size(4) +
/// type(4) + version(1) + flags(3) + sample_count(4).
fn trun_data_offset_position() -> usize {
    16
}
