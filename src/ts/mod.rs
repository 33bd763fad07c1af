//! MPEG-TS muxer: PAT/PMT, PES framing, and 188-byte packet
//! splitting with adaptation-field stuffing.
//!
//! There is no MPEG-TS writer elsewhere in this codebase (`recorder/` is
//! fMP4/DASH-only), so this module is grounded on the PAT/PMT/PES/CRC
//! construction in
//! `other_examples/d63de012_xjkuchao-tao__crates-tao-format-src-muxers-mpegts.rs.rs`,
//! adapted to this crate's fixed PIDs and byte-writer conventions
//! ([`crate::binary`]) instead of that muxer's raw `[u8; 188]` indexing.

use bytes::Bytes;

use crate::error::MuxerError;
use crate::sample_codec;
use crate::types::{Codec, EncodedFrame};

const PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;

const PID_PAT: u16 = 0x0000;
const PID_PMT: u16 = 0x1000;
const PID_VIDEO: u16 = 0x0101;
const PID_AUDIO: u16 = 0x0102;

const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;

const STREAM_ID_VIDEO: u8 = 0xE0;
const STREAM_ID_AUDIO: u8 = 0xC0;

/// PCR/PTS system clock, fixed at 90 kHz for every elementary stream
/// regardless of its own sample-rate/timescale.
const SYSTEM_CLOCK: u32 = 90_000;

/// Stateful MPEG-TS muxer. One instance is expected to live for the
/// duration of a stream (or at least a segment); continuity counters
/// persist across `build_segment` calls the way a real HLS packager keeps
/// per-PID counters running. The PCR is scoped to a single segment: each
/// call to `build_segment` inserts a fresh PCR on its first video packet.
#[derive(Debug, Default)]
pub struct TsMuxer {
    pat_cc: u8,
    pmt_cc: u8,
    video_cc: u8,
    audio_cc: u8,
}

impl TsMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mux one segment's worth of frames into a sequence of 188-byte
    /// packets: one PAT, one PMT, then one PES (split across packets) per
    /// access unit in ingest order.
    pub fn build_segment(&mut self, frames: &[EncodedFrame]) -> Result<Bytes, MuxerError> {
        let has_video = frames.iter().any(|f| f.codec == Codec::H264);
        let has_audio = frames.iter().any(|f| f.codec == Codec::Aac);
        for f in frames {
            if f.codec != Codec::H264 && f.codec != Codec::Aac {
                return Err(MuxerError::MalformedMedia(format!(
                    "TsMuxer only supports H.264 video and AAC-ADTS audio, got {:?}",
                    f.codec
                )));
            }
        }

        let pcr_pid = if has_video { PID_VIDEO } else { PID_AUDIO };
        let mut out = Vec::with_capacity(frames.len() * PACKET_SIZE * 2 + 2 * PACKET_SIZE);

        out.extend_from_slice(&self.write_pat());
        out.extend_from_slice(&self.write_pmt(has_video, has_audio, pcr_pid));

        let mut pcr_written = false;
        for frame in frames {
            match frame.codec {
                Codec::H264 => self.write_video_access_unit(&mut out, frame, &mut pcr_written),
                Codec::Aac => self.write_audio_access_unit(&mut out, frame),
                _ => unreachable!("filtered above"),
            }
        }

        Ok(Bytes::from(out))
    }

    fn write_pat(&mut self) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40; // PUSI=1, PID high bits=0 (PAT PID is 0x0000)
        packet[2] = 0x00;
        packet[3] = 0x10 | (self.pat_cc & 0x0F);
        self.pat_cc = self.pat_cc.wrapping_add(1);

        packet[4] = 0x00; // pointer_field

        let section_start = 5;
        packet[section_start] = 0x00; // table_id
        let section_length: u16 = 9; // 5 header bytes (post length field) + 4-byte program entry
        packet[section_start + 1] = 0xB0 | ((section_length >> 8) as u8 & 0x0F);
        packet[section_start + 2] = section_length as u8;
        packet[section_start + 3] = 0x00; // transport_stream_id hi
        packet[section_start + 4] = 0x01; // transport_stream_id lo
        packet[section_start + 5] = 0xC1; // reserved/version=0/current_next=1
        packet[section_start + 6] = 0x00; // section_number
        packet[section_start + 7] = 0x00; // last_section_number
        packet[section_start + 8] = 0x00; // program_number hi
        packet[section_start + 9] = 0x01; // program_number lo
        packet[section_start + 10] = 0xE0 | ((PID_PMT >> 8) as u8 & 0x1F);
        packet[section_start + 11] = PID_PMT as u8;

        let crc = crc32_mpeg2(&packet[section_start..section_start + 12]);
        let crc_pos = section_start + 12;
        packet[crc_pos..crc_pos + 4].copy_from_slice(&crc.to_be_bytes());
        fill_stuffing(&mut packet, crc_pos + 4);
        packet
    }

    fn write_pmt(&mut self, has_video: bool, has_audio: bool, pcr_pid: u16) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40 | ((PID_PMT >> 8) as u8 & 0x1F);
        packet[2] = PID_PMT as u8;
        packet[3] = 0x10 | (self.pmt_cc & 0x0F);
        self.pmt_cc = self.pmt_cc.wrapping_add(1);

        packet[4] = 0x00; // pointer_field

        let section_start = 5;
        packet[section_start] = 0x02; // table_id = PMT

        let stream_count = has_video as usize + has_audio as usize;
        let section_length = 9 + 5 * stream_count;
        packet[section_start + 1] = 0xB0 | ((section_length >> 8) as u8 & 0x0F);
        packet[section_start + 2] = section_length as u8;
        packet[section_start + 3] = 0x00; // program_number hi
        packet[section_start + 4] = 0x01; // program_number lo
        packet[section_start + 5] = 0xC1; // reserved/version=0/current_next=1
        packet[section_start + 6] = 0x00; // section_number
        packet[section_start + 7] = 0x00; // last_section_number
        packet[section_start + 8] = 0xE0 | ((pcr_pid >> 8) as u8 & 0x1F);
        packet[section_start + 9] = pcr_pid as u8;
        packet[section_start + 10] = 0xF0; // reserved + program_info_length hi (=0)
        packet[section_start + 11] = 0x00;

        let mut pos = section_start + 12;
        if has_video {
            packet[pos] = STREAM_TYPE_H264;
            packet[pos + 1] = 0xE0 | ((PID_VIDEO >> 8) as u8 & 0x1F);
            packet[pos + 2] = PID_VIDEO as u8;
            packet[pos + 3] = 0xF0;
            packet[pos + 4] = 0x00;
            pos += 5;
        }
        if has_audio {
            packet[pos] = STREAM_TYPE_AAC_ADTS;
            packet[pos + 1] = 0xE0 | ((PID_AUDIO >> 8) as u8 & 0x1F);
            packet[pos + 2] = PID_AUDIO as u8;
            packet[pos + 3] = 0xF0;
            packet[pos + 4] = 0x00;
            pos += 5;
        }

        let crc = crc32_mpeg2(&packet[section_start..pos]);
        packet[pos..pos + 4].copy_from_slice(&crc.to_be_bytes());
        fill_stuffing(&mut packet, pos + 4);
        packet
    }

    fn write_video_access_unit(&mut self, out: &mut Vec<u8>, frame: &EncodedFrame, pcr_written: &mut bool) {
        let annex_b = sample_codec::length_prefixed_to_annex_b(&frame.data);
        let pts = frame.timestamp.to_ticks(SYSTEM_CLOCK);

        let pcr = if !*pcr_written {
            *pcr_written = true;
            Some(pts)
        } else {
            None
        };

        let pes = build_pes(STREAM_ID_VIDEO, pts, None, &annex_b);
        write_pes_packets(
            out,
            PID_VIDEO,
            &mut self.video_cc,
            &pes,
            Some(LeadingAdaptation {
                random_access: frame.is_keyframe,
                pcr,
            }),
        );
    }

    fn write_audio_access_unit(&mut self, out: &mut Vec<u8>, frame: &EncodedFrame) {
        let pts = frame.timestamp.to_ticks(SYSTEM_CLOCK);
        let pes = build_pes(STREAM_ID_AUDIO, pts, None, &frame.data);
        write_pes_packets(out, PID_AUDIO, &mut self.audio_cc, &pes, None);
    }
}

/// Leading adaptation-field requirements for the first TS packet of a PES.
#[derive(Debug, Clone, Copy)]
struct LeadingAdaptation {
    random_access: bool,
    pcr: Option<u64>,
}

/// Build a PES packet: start code + stream_id + length + optional header
/// flags/PTS(/DTS) + payload.
fn build_pes(stream_id: u8, pts: u64, dts: Option<u64>, payload: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(payload.len() + 19);
    pes.extend_from_slice(&[0x00, 0x00, 0x01]);
    pes.push(stream_id);

    let has_dts = dts.is_some();
    let optional_len = if has_dts { 10 } else { 5 };
    let total_len = payload.len() + 3 + optional_len;
    let pes_length = if total_len <= 0xFFFF { total_len as u16 } else { 0 };
    pes.extend_from_slice(&pes_length.to_be_bytes());

    pes.push(0x80); // '10' marker bits, data_alignment_indicator=1
    let pts_dts_flags = if has_dts { 0xC0 } else { 0x80 };
    pes.push(pts_dts_flags);
    pes.push(optional_len as u8);

    if let Some(dts) = dts {
        write_timestamp_field(&mut pes, 0x3, pts);
        write_timestamp_field(&mut pes, 0x1, dts);
    } else {
        write_timestamp_field(&mut pes, 0x2, pts);
    }

    pes.extend_from_slice(payload);
    pes
}

/// Pack a 33-bit PTS/DTS value into the standard 5-byte form, `prefix`
/// being the 4-bit marker (`0010`=PTS-only, `0011`=PTS of a pair, `0001`=DTS).
fn write_timestamp_field(buf: &mut Vec<u8>, prefix: u8, value: u64) {
    let v = value & 0x1_FFFF_FFFF;
    buf.push((prefix << 4) | (((v >> 29) & 0x0E) as u8) | 0x01);
    buf.push(((v >> 22) & 0xFF) as u8);
    buf.push((((v >> 14) & 0xFE) as u8) | 0x01);
    buf.push(((v >> 7) & 0xFF) as u8);
    buf.push((((v << 1) & 0xFE) as u8) | 0x01);
}

fn write_pcr_field(buf: &mut Vec<u8>, pcr_base_90k: u64) {
    let base = pcr_base_90k & 0x1_FFFF_FFFF;
    buf.push((base >> 25) as u8);
    buf.push((base >> 17) as u8);
    buf.push((base >> 9) as u8);
    buf.push((base >> 1) as u8);
    buf.push((((base & 0x1) << 7) as u8) | 0x7E);
    buf.push(0x00); // extension, always 0
}

/// Split a serialized PES into 188-byte TS packets, advancing `cc` per
/// payload-carrying packet and honoring `leading` on the first packet.
fn write_pes_packets(
    out: &mut Vec<u8>,
    pid: u16,
    cc: &mut u8,
    pes: &[u8],
    leading: Option<LeadingAdaptation>,
) {
    let mut offset = 0;
    let mut first = true;

    while offset < pes.len() {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = (if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F);
        packet[2] = pid as u8;

        let leading_af = if first { leading } else { None };
        let remaining = pes.len() - offset;
        let payload_capacity = PACKET_SIZE - 4;

        let consumed = if let Some(LeadingAdaptation { random_access, pcr }) = leading_af {
            let pcr_len = if pcr.is_some() { 6 } else { 0 };
            // adaptation_field_length byte + flags byte + optional PCR.
            let af_fixed_len = 1 + 1 + pcr_len;
            let take = remaining.min(payload_capacity - af_fixed_len);
            let stuffing = payload_capacity - af_fixed_len - take;

            packet[3] = 0x30 | (*cc & 0x0F);
            let af_len = (1 + pcr_len + stuffing) as u8;
            packet[4] = af_len;
            let mut flags = 0u8;
            if random_access {
                flags |= 0x40;
            }
            if pcr.is_some() {
                flags |= 0x10;
            }
            packet[5] = flags;
            let mut cursor = 6;
            if let Some(pcr_val) = pcr {
                let mut pcr_bytes = Vec::with_capacity(6);
                write_pcr_field(&mut pcr_bytes, pcr_val);
                packet[cursor..cursor + 6].copy_from_slice(&pcr_bytes);
                cursor += 6;
            }
            for b in &mut packet[cursor..cursor + stuffing] {
                *b = 0xFF;
            }
            cursor += stuffing;
            packet[cursor..cursor + take].copy_from_slice(&pes[offset..offset + take]);
            take
        } else if remaining >= payload_capacity {
            packet[3] = 0x10 | (*cc & 0x0F);
            packet[4..PACKET_SIZE].copy_from_slice(&pes[offset..offset + payload_capacity]);
            payload_capacity
        } else {
            let stuff_len = payload_capacity - remaining;
            if stuff_len == 0 {
                packet[3] = 0x10 | (*cc & 0x0F);
                packet[4..4 + remaining].copy_from_slice(&pes[offset..offset + remaining]);
            } else if stuff_len == 1 {
                // adaptation_field_length alone (0) consumes the one spare byte.
                packet[3] = 0x30 | (*cc & 0x0F);
                packet[4] = 0;
                packet[5..5 + remaining].copy_from_slice(&pes[offset..offset + remaining]);
            } else {
                packet[3] = 0x30 | (*cc & 0x0F);
                let af_len = (stuff_len - 1) as u8;
                packet[4] = af_len;
                packet[5] = 0x00; // flags, no optional fields
                for b in &mut packet[6..4 + stuff_len] {
                    *b = 0xFF;
                }
                let payload_start = 4 + stuff_len;
                packet[payload_start..payload_start + remaining].copy_from_slice(&pes[offset..offset + remaining]);
            }
            remaining
        };

        *cc = cc.wrapping_add(1);
        out.extend_from_slice(&packet);
        offset += consumed;
        first = false;
    }
}

fn fill_stuffing(packet: &mut [u8; PACKET_SIZE], from: usize) {
    for b in &mut packet[from..] {
        *b = 0xFF;
    }
}

/// MPEG-2 Section CRC32 (polynomial `0x04C11DB7`).
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn video_frame(ts: f64, keyframe: bool) -> EncodedFrame {
        let mut nalu = Vec::new();
        nalu.extend_from_slice(&4u32.to_be_bytes());
        nalu.extend_from_slice(&[0x65, 0xAA, 0xBB, 0xCC]);
        EncodedFrame::new(
            Bytes::from(nalu),
            Timestamp::from_secs(ts),
            Timestamp::from_secs(1.0 / 30.0),
            keyframe,
            Codec::H264,
        )
    }

    fn audio_frame(ts: f64) -> EncodedFrame {
        EncodedFrame::new(
            Bytes::from_static(&[0xFF, 0xF1, 0x50, 0x80, 0x01, 0x3F, 0xFC, 1, 2]),
            Timestamp::from_secs(ts),
            Timestamp::from_secs(0.02),
            false,
            Codec::Aac,
        )
    }

    #[test]
    fn segment_is_packet_aligned() {
        let mut muxer = TsMuxer::new();
        let out = muxer
            .build_segment(&[video_frame(0.0, true), audio_frame(0.0)])
            .unwrap();
        assert_eq!(out.len() % PACKET_SIZE, 0);
        assert!(out.len() >= 4 * PACKET_SIZE);
    }

    #[test]
    fn every_packet_starts_with_sync_byte() {
        let mut muxer = TsMuxer::new();
        let out = muxer
            .build_segment(&[video_frame(0.0, true), audio_frame(0.0)])
            .unwrap();
        for chunk in out.chunks(PACKET_SIZE) {
            assert_eq!(chunk[0], SYNC_BYTE);
        }
    }

    #[test]
    fn pat_then_pmt_come_first() {
        let mut muxer = TsMuxer::new();
        let out = muxer.build_segment(&[video_frame(0.0, true)]).unwrap();
        // PAT: PID 0x0000, PUSI set.
        assert_eq!(out[1] & 0x1F, 0x00);
        assert_eq!(out[1] & 0x40, 0x40);
        // PMT: PID 0x1000.
        let pmt_pid = (((out[PACKET_SIZE + 1] & 0x1F) as u16) << 8) | out[PACKET_SIZE + 2] as u16;
        assert_eq!(pmt_pid, PID_PMT);
    }

    #[test]
    fn first_video_packet_carries_pcr_and_rai() {
        let mut muxer = TsMuxer::new();
        let out = muxer.build_segment(&[video_frame(0.0, true)]).unwrap();
        let first_video_packet = &out[2 * PACKET_SIZE..3 * PACKET_SIZE];
        assert_eq!(first_video_packet[3] & 0x30, 0x30); // adaptation + payload
        let flags = first_video_packet[5];
        assert_eq!(flags & 0x40, 0x40); // random_access_indicator
        assert_eq!(flags & 0x10, 0x10); // PCR_flag
    }

    #[test]
    fn second_segment_also_carries_a_pcr() {
        let mut muxer = TsMuxer::new();
        muxer.build_segment(&[video_frame(0.0, true)]).unwrap();
        let out = muxer.build_segment(&[video_frame(1.0, true)]).unwrap();
        let first_video_packet = &out[2 * PACKET_SIZE..3 * PACKET_SIZE];
        let flags = first_video_packet[5];
        assert_eq!(flags & 0x10, 0x10); // PCR_flag
    }

    #[test]
    fn continuity_counters_increment_across_segments() {
        let mut muxer = TsMuxer::new();
        muxer.build_segment(&[video_frame(0.0, true)]).unwrap();
        let cc_after_first = muxer.video_cc;
        muxer.build_segment(&[video_frame(1.0, true)]).unwrap();
        assert_ne!(muxer.video_cc, cc_after_first);
    }

    #[test]
    fn rejects_unsupported_codec() {
        let mut muxer = TsMuxer::new();
        let frame = EncodedFrame::new(
            Bytes::from_static(&[1, 2, 3]),
            Timestamp::zero(),
            Timestamp::from_secs(0.03),
            true,
            Codec::Vp9,
        );
        assert!(matches!(
            muxer.build_segment(&[frame]),
            Err(MuxerError::MalformedMedia(_))
        ));
    }
}
