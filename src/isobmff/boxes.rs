//! Free-standing box builders shared by every track kind.
//!
//! Grounded on `recorder/fmp4.rs`'s standalone `build_mvhd`/`build_tkhd`/
//! `build_mdhd`/`build_hdlr`/`build_vmhd`/`build_smhd`/`build_dinf`/
//! `build_avcc` functions, rewritten over [`crate::binary::BinaryWriter`]
//! instead of a bare `Vec<u8>` plus free `be_u32`/`zeroes` helpers.

use crate::binary::BinaryWriter;
use crate::error::MuxerError;

pub fn build_ftyp_moov(major_brand: &[u8; 4], compatible: &[&[u8; 4]]) -> Result<Vec<u8>, MuxerError> {
    let mut payload = BinaryWriter::new();
    payload.fourcc(major_brand).u32(0);
    for brand in compatible {
        payload.fourcc(brand);
    }
    crate::binary::write_box(b"ftyp", payload.as_slice())
}

pub fn build_styp() -> Result<Vec<u8>, MuxerError> {
    build_ftyp_moov(b"msdh", &[b"msdh", b"msix", b"isom"])
}

pub fn build_mvhd(timescale: u32, next_track_id: u32) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.zeros(8) // creation/modification time
        .u32(timescale)
        .u32(0) // duration unknown (fragmented)
        .fixed16_16(1.0) // rate
        .u16(0x0100) // volume
        .u16(0) // reserved
        .zeros(8); // reserved
    identity_matrix(&mut p);
    p.zeros(24) // pre_defined[6]
        .u32(next_track_id);
    crate::binary::write_full_box(b"mvhd", 0, 0, p.as_slice())
}

pub fn build_tkhd(track_id: u32, width: u32, height: u32) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.zeros(8) // creation/modification time
        .u32(track_id)
        .u32(0) // reserved
        .u32(0) // duration
        .zeros(8) // reserved
        .u16(0) // layer
        .u16(0) // alternate group
        .u16(0) // volume (left at 0; non-zero for an audio-only track is a caller concern)
        .u16(0); // reserved
    identity_matrix(&mut p);
    p.u32(width << 16).u32(height << 16);
    // track enabled (0x01) | in movie (0x02) = 0x03
    crate::binary::write_full_box(b"tkhd", 0, 0x000003, p.as_slice())
}

fn identity_matrix(p: &mut BinaryWriter) {
    p.u32(0x0001_0000).u32(0).u32(0);
    p.u32(0).u32(0x0001_0000).u32(0);
    p.u32(0).u32(0).u32(0x4000_0000);
}

pub fn build_mdhd(timescale: u32) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.zeros(8) // creation/modification time
        .u32(timescale)
        .u32(0) // duration
        .u16(0x55C4) // language "und" (packed ISO-639-2/T)
        .u16(0); // pre_defined
    crate::binary::write_full_box(b"mdhd", 0, 0, p.as_slice())
}

pub fn build_hdlr(handler_type: &[u8; 4], name: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u32(0) // pre_defined
        .fourcc(handler_type)
        .zeros(12); // reserved[3]
    p.bytes(name);
    crate::binary::write_full_box(b"hdlr", 0, 0, p.as_slice())
}

pub fn build_vmhd() -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u16(0).u16(0).u16(0).u16(0); // graphicsmode, opcolor[3]
    crate::binary::write_full_box(b"vmhd", 0, 1, p.as_slice())
}

pub fn build_smhd() -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u16(0).u16(0); // balance, reserved
    crate::binary::write_full_box(b"smhd", 0, 0, p.as_slice())
}

pub fn build_dinf() -> Result<Vec<u8>, MuxerError> {
    let url_box = crate::binary::write_full_box(b"url ", 0, 1, &[])?;
    let mut dref_payload = BinaryWriter::new();
    dref_payload.u32(1); // entry_count
    dref_payload.bytes(&url_box);
    let dref = crate::binary::write_full_box(b"dref", 0, 0, dref_payload.as_slice())?;
    crate::binary::write_container(b"dinf", &[dref])
}

pub fn build_empty_stts_stsc_stco(box_type: &[u8; 4]) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u32(0); // entry_count = 0
    crate::binary::write_full_box(box_type, 0, 0, p.as_slice())
}

pub fn build_empty_stsz() -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u32(0).u32(0); // sample_size = 0, sample_count = 0
    crate::binary::write_full_box(b"stsz", 0, 0, p.as_slice())
}

pub fn build_mvex(track_id: u32) -> Result<Vec<u8>, MuxerError> {
    let mut trex_payload = BinaryWriter::new();
    trex_payload
        .u32(track_id)
        .u32(1) // default_sample_description_index
        .u32(0) // default_sample_duration
        .u32(0) // default_sample_size
        .u32(0); // default_sample_flags
    let trex = crate::binary::write_full_box(b"trex", 0, 0, trex_payload.as_slice())?;
    crate::binary::write_container(b"mvex", &[trex])
}

/// `avcC`: configurationVersion + profile/compatibility/level copied from
/// the SPS, a single SPS and a single PPS.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u8(1) // configurationVersion
        .u8(*sps.get(1).unwrap_or(&0)) // profile_idc
        .u8(*sps.get(2).unwrap_or(&0)) // profile_compatibility
        .u8(*sps.get(3).unwrap_or(&0)) // level_idc
        .u8(0xFF) // 6 bits reserved (1) + lengthSizeMinusOne=3
        .u8(0xE1); // 3 bits reserved (1) + numOfSequenceParameterSets=1
    p.u16(sps.len() as u16).bytes(sps);
    p.u8(1); // numOfPictureParameterSets
    p.u16(pps.len() as u16).bytes(pps);
    crate::binary::write_box(b"avcC", p.as_slice())
}

pub fn build_avc1_sample_entry(width: u32, height: u32, avcc: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = visual_sample_entry_prefix(width, height);
    p.bytes(avcc);
    crate::binary::write_box(b"avc1", p.as_slice())
}

/// `hvcC`: a single parameter-set array per NAL unit type (VPS=32, SPS=33,
/// PPS=34), one NALU per array. Simplified relative to the full HEVCDecoderConfigurationRecord
/// (no general_profile_compatibility_flags breakdown, no multiple NALUs per
/// array), sufficient to let a conformant demuxer locate the parameter sets.
pub fn build_hvcc(vps: &[u8], sps: &[u8], pps: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u8(1) // configurationVersion
        .u8(0) // general_profile_space(2)|general_tier_flag(1)|general_profile_idc(5), left 0
        .zeros(4) // general_profile_compatibility_flags
        .zeros(6) // general_constraint_indicator_flags
        .u8(0) // general_level_idc
        .u16(0xF000) // reserved(4)=1111 | min_spatial_segmentation_idc(12)=0
        .u8(0xFC) // reserved(6)=111111 | parallelismType(2)=0
        .u8(0xFC) // reserved(6) | chromaFormat(2), left 0
        .u8(0xF8) // reserved(5) | bitDepthLumaMinus8(3), left 0
        .u8(0xF8) // reserved(5) | bitDepthChromaMinus8(3), left 0
        .u16(0) // avgFrameRate
        .u8(0x03) // constantFrameRate(2)=0 | numTemporalLayers(3)=0 | temporalIdNested(1)=0 | lengthSizeMinusOne(2)=3
        .u8(3); // numOfArrays
    for (nal_unit_type, nalu) in [(32u8, vps), (33u8, sps), (34u8, pps)] {
        p.u8(0x80 | nal_unit_type) // array_completeness=1 | reserved(1)=0 | NAL_unit_type(6)
            .u16(1); // numNalus
        p.u16(nalu.len() as u16).bytes(nalu);
    }
    crate::binary::write_box(b"hvcC", p.as_slice())
}

pub fn build_hev1_sample_entry(width: u32, height: u32, hvcc: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = visual_sample_entry_prefix(width, height);
    p.bytes(hvcc);
    crate::binary::write_box(b"hev1", p.as_slice())
}

/// `vpcC` (VP Codec Configuration Box, `VP Codec ISO Media File Format
/// Binding` §4.3.2): profile/level/bit depth plus an empty codec
/// initialization data block (VP8/VP9 carry no out-of-band config beyond
/// these fields).
pub fn build_vpcc(profile: u8, level: u8, bit_depth: u8) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u8(profile)
        .u8(level)
        .u8((bit_depth << 4) | 0x0E) // bitDepth(4)|chromaSubsampling(3)=111|videoFullRangeFlag(1)=0
        .u8(1) // colourPrimaries (unspecified=2 would be safer; 1=BT.709 default)
        .u8(1) // transferCharacteristics
        .u8(1) // matrixCoefficients
        .u16(0); // codecInitializationDataSize = 0
    crate::binary::write_full_box(b"vpcC", 1, 0, p.as_slice())
}

/// `fourcc` is `vp08` for VP8 or `vp09` for VP9; the sample entry layout is
/// identical, only the codec's box name differs.
pub fn build_vpx_sample_entry(fourcc: &[u8; 4], width: u32, height: u32, vpcc: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = visual_sample_entry_prefix(width, height);
    p.bytes(vpcc);
    crate::binary::write_box(fourcc, p.as_slice())
}

/// `av1C` (AV1 Codec Configuration Box, `AV1 Codec ISO Media File Format
/// Binding` §2.3.3) carrying the raw OBU sequence header as
/// `configOBUs`.
pub fn build_av1c(seq_profile: u8, seq_level_idx: u8, seq_tier: u8, sequence_header_obu: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.u8(0x80) // marker(1)=1 | version(7)=1
        .u8(((seq_profile & 0x07) << 5) | (seq_level_idx & 0x1F))
        .u8(((seq_tier & 0x01) << 7)); // high_bitdepth/twelve_bit/monochrome/chroma_* left 0
    p.bytes(sequence_header_obu);
    crate::binary::write_box(b"av1C", p.as_slice())
}

pub fn build_av01_sample_entry(width: u32, height: u32, av1c: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let mut p = visual_sample_entry_prefix(width, height);
    p.bytes(av1c);
    crate::binary::write_box(b"av01", p.as_slice())
}

/// The `VisualSampleEntry` fields every video codec's sample entry shares,
/// up to (but not including) the codec-specific configuration box.
fn visual_sample_entry_prefix(width: u32, height: u32) -> BinaryWriter {
    let mut p = BinaryWriter::new();
    p.zeros(6) // reserved
        .u16(1) // data_reference_index
        .u16(0) // pre_defined
        .u16(0) // reserved
        .zeros(12) // pre_defined[3]
        .u16(width as u16)
        .u16(height as u16)
        .u32(0x0048_0000) // horizresolution 72 dpi
        .u32(0x0048_0000) // vertresolution 72 dpi
        .u32(0) // reserved
        .u16(1) // frame_count
        .zeros(32) // compressorname
        .u16(0x0018) // depth
        .u16(0xFFFF); // pre_defined (-1)
    p
}
