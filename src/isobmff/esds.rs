//! `mp4a`/`esds` AAC sample entry construction, including the
//! `AudioSpecificConfig` bit-packing math.
//!
//! `fmp4.rs` elsewhere in this codebase only ever emits an Opus `dOps` box
//! (AAC never passed through the SFU as a recordable codec there), so there
//! is no direct precedent for this one; it follows the same MPEG-4
//! descriptor encoding any ISOBMFF writer needs and keeps the same
//! box-building style (`BinaryWriter` + `write_box`/`write_full_box`) as the
//! rest of this crate.

use crate::binary::BinaryWriter;
use crate::error::MuxerError;

/// AAC object types addressable from `AudioSpecificConfig.audioObjectType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacObjectType {
    Lc,
    He,
    HeV2,
    Ld,
    Eld,
}

impl AacObjectType {
    fn code(self) -> u8 {
        match self {
            AacObjectType::Lc => 2,
            AacObjectType::He => 5,
            AacObjectType::HeV2 => 29,
            AacObjectType::Ld => 23,
            AacObjectType::Eld => 39,
        }
    }
}

/// The MPEG-4 sample-rate index table (`ISO/IEC 14496-3` Table 1.16); `15`
/// marks "not in table" for sample rates outside the 13 standard values.
fn sample_rate_index(sample_rate: u32) -> u8 {
    const TABLE: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    TABLE
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
        .unwrap_or(15)
}

/// Pack the 2-byte `AudioSpecificConfig`: `(objectType<<3) |
/// (srIndex>>1)`, then `((srIndex&1)<<7) | (channelConfig<<3)`.
pub fn audio_specific_config(object_type: AacObjectType, sample_rate: u32, channels: u16) -> [u8; 2] {
    let object_type = object_type.code();
    let sr_index = sample_rate_index(sample_rate);
    let channel_config = channels.min(7) as u8;
    let byte0 = (object_type << 3) | (sr_index >> 1);
    let byte1 = ((sr_index & 1) << 7) | (channel_config << 3);
    [byte0, byte1]
}

/// Variable-length MPEG-4 descriptor size encoding (ISO/IEC 14496-1 §8.3.3):
/// 7 bits per byte, most-significant group first, continuation bit set on
/// every byte but the last.
fn encode_descriptor_len(size: usize) -> Vec<u8> {
    let mut groups = Vec::new();
    let mut v = size;
    loop {
        groups.push((v & 0x7F) as u8);
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    groups.reverse();
    let last = groups.len() - 1;
    for (i, b) in groups.iter_mut().enumerate() {
        if i != last {
            *b |= 0x80;
        }
    }
    groups
}

fn write_descriptor(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(tag);
    out.extend_from_slice(&encode_descriptor_len(payload.len()));
    out.extend_from_slice(payload);
    out
}

const TAG_ES_DESCR: u8 = 0x03;
const TAG_DECODER_CONFIG_DESCR: u8 = 0x04;
const TAG_DECODER_SPECIFIC_INFO: u8 = 0x05;
const TAG_SL_CONFIG_DESCR: u8 = 0x06;

/// objectTypeIndication for "Audio ISO/IEC 14496-3" (AAC).
const OBJECT_TYPE_INDICATION_AAC: u8 = 0x40;
/// streamType = AudioStream (5) << 2 | upStream (0) << 1 | reserved (1).
const STREAM_TYPE_AUDIO: u8 = 0x15;

/// Build the `esds` box payload.
fn build_esds(track_id: u32, object_type: AacObjectType, sample_rate: u32, channels: u16) -> Result<Vec<u8>, MuxerError> {
    let asc = audio_specific_config(object_type, sample_rate, channels);
    let decoder_specific_info = write_descriptor(TAG_DECODER_SPECIFIC_INFO, &asc);

    let mut decoder_config_payload = Vec::new();
    decoder_config_payload.push(OBJECT_TYPE_INDICATION_AAC);
    decoder_config_payload.push(STREAM_TYPE_AUDIO);
    decoder_config_payload.extend_from_slice(&[0u8; 3]); // bufferSizeDB
    decoder_config_payload.extend_from_slice(&0u32.to_be_bytes()); // maxBitrate
    decoder_config_payload.extend_from_slice(&0u32.to_be_bytes()); // avgBitrate
    decoder_config_payload.extend_from_slice(&decoder_specific_info);
    let decoder_config_descr = write_descriptor(TAG_DECODER_CONFIG_DESCR, &decoder_config_payload);

    let sl_config_descr = write_descriptor(TAG_SL_CONFIG_DESCR, &[0x02]); // predefined MP4

    let mut es_payload = Vec::new();
    es_payload.extend_from_slice(&(track_id as u16).to_be_bytes()); // ES_ID
    es_payload.push(0); // flags: streamDependence=0, URL_Flag=0, OCRstreamFlag=0
    es_payload.extend_from_slice(&decoder_config_descr);
    es_payload.extend_from_slice(&sl_config_descr);
    let es_descr = write_descriptor(TAG_ES_DESCR, &es_payload);

    crate::binary::write_full_box(b"esds", 0, 0, &es_descr)
}

/// Build the `mp4a` sample entry.
pub fn build_mp4a_sample_entry(
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    object_type: AacObjectType,
) -> Result<Vec<u8>, MuxerError> {
    let mut p = BinaryWriter::new();
    p.zeros(6) // reserved
        .u16(1) // data_reference_index
        .zeros(8) // version/revision/vendor
        .u16(channels)
        .u16(16) // sample size
        .zeros(4) // reserved
        .u32(sample_rate << 16);
    let esds = build_esds(track_id, object_type, sample_rate, channels)?;
    p.bytes(&esds);
    crate::binary::write_box(b"mp4a", p.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_index_table_lookup() {
        assert_eq!(sample_rate_index(48000), 3);
        assert_eq!(sample_rate_index(44100), 4);
        assert_eq!(sample_rate_index(1234), 15);
    }

    #[test]
    fn audio_specific_config_packs_lc_stereo_48k() {
        let asc = audio_specific_config(AacObjectType::Lc, 48000, 2);
        // objectType=2 (00010), srIndex=3 (0011): byte0 = 00010 001 = 0x11
        assert_eq!(asc[0], 0b0001_0001);
        // srIndex low bit=1, channelConfig=2 (010): byte1 = 1 00010 000 = 0x90
        assert_eq!(asc[1], 0b1001_0000);
    }

    #[test]
    fn descriptor_length_round_trips_small_and_large() {
        assert_eq!(encode_descriptor_len(5), vec![5]);
        assert_eq!(encode_descriptor_len(0x80), vec![0x81, 0x00]);
        assert_eq!(encode_descriptor_len(0x4000), vec![0x81, 0x80, 0x00]);
    }

    #[test]
    fn esds_box_contains_decoder_specific_info_tag() {
        let esds = build_esds(1, AacObjectType::Lc, 48000, 2).unwrap();
        assert!(esds.windows(1).any(|w| w[0] == TAG_DECODER_SPECIFIC_INFO));
    }

    #[test]
    fn mp4a_sample_entry_has_box_header() {
        let entry = build_mp4a_sample_entry(1, 2, 48000, AacObjectType::Lc).unwrap();
        assert_eq!(&entry[4..8], b"mp4a");
    }
}
