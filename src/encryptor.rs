//! Segment- and sample-level encryption.
//!
//! Whole-segment AES-CBC reuses [`crate::crypto::AesCbc`] directly.
//! SAMPLE-AES walks an already-muxed MPEG-TS buffer PID-by-PID, reusing the
//! PAT/PMT layout `ts::TsMuxer` writes and the clear/encrypted span planning
//! in [`crate::sample_codec`]. The directory-mode helper is grounded on
//! `recorder/segmenter.rs::store_file`'s `opendal::Operator` read/write
//! pattern.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::AesCbc;
use crate::error::CryptoError;
use crate::sample_codec;
use crate::types::Codec;

const TS_PACKET_SIZE: usize = 188;
const TS_SYNC_BYTE: u8 = 0x47;
const PID_PAT: u16 = 0x0000;

/// Segment encryption methods. `SampleAesCtr` is declared for
/// completeness but rejected at encrypt time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMethod {
    Aes128Cbc,
    SampleAes,
    SampleAesCtr,
}

impl EncryptionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionMethod::Aes128Cbc => "AES-128",
            EncryptionMethod::SampleAes => "SAMPLE-AES",
            EncryptionMethod::SampleAesCtr => "SAMPLE-AES-CTR",
        }
    }
}

fn default_encryption_method() -> EncryptionMethod {
    EncryptionMethod::Aes128Cbc
}

fn default_rotation_interval() -> u64 {
    0
}

fn default_key_filename() -> String {
    "key.bin".to_string()
}

/// Encryption parameters a caller loads from the same config file shape as
/// [`crate::segmenter::SegmenterConfig`]. Keys themselves are never part of
/// this struct; they stay out of band (environment, secret store, KMS) and
/// are supplied to [`SegmentEncryptor`]/[`plan_rotation`] directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_encryption_method")]
    pub method: EncryptionMethod,
    /// Number of segments per key-rotation window; `0` disables rotation.
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval: u64,
    #[serde(default)]
    pub write_key_file: bool,
    #[serde(default = "default_key_filename")]
    pub key_filename: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            method: default_encryption_method(),
            rotation_interval: default_rotation_interval(),
            write_key_file: false,
            key_filename: default_key_filename(),
        }
    }
}

impl From<&EncryptionConfig> for DirectoryEncryptOptions {
    fn from(config: &EncryptionConfig) -> Self {
        Self {
            write_key_file: config.write_key_file,
            key_filename: config.key_filename.clone(),
        }
    }
}

/// Derive the sequence-based IV: big-endian `u64` index in the low 8 bytes,
/// high 8 bytes zero.
pub fn derive_iv(sequence_index: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..16].copy_from_slice(&sequence_index.to_be_bytes());
    iv
}

/// One entry in a key-rotation schedule: the segment index a key family
/// starts at, and the key itself.
#[derive(Debug, Clone)]
pub struct RotationEntry {
    pub start_index: u64,
    pub key: Vec<u8>,
}

/// Generate a fresh random 128-bit key, for callers that want
/// `plan_rotation` to own key material instead of supplying their own.
pub fn generate_key() -> Vec<u8> {
    let bytes: [u8; 16] = rand::random();
    bytes.to_vec()
}

/// Generate `count` fresh 128-bit keys for a rotation schedule.
pub fn generate_rotation_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|_| generate_key()).collect()
}

/// Plan a rotation schedule: segment index `i` uses the key family started
/// at `floor(i / rotation_interval) * rotation_interval`. `keys`
/// is consumed round-robin, one per window.
pub fn plan_rotation(segment_count: u64, rotation_interval: u64, keys: &[Vec<u8>]) -> Vec<RotationEntry> {
    if rotation_interval == 0 || keys.is_empty() {
        return Vec::new();
    }
    let mut entries = Vec::new();
    let mut start = 0;
    let mut key_idx = 0;
    while start < segment_count {
        entries.push(RotationEntry {
            start_index: start,
            key: keys[key_idx % keys.len()].clone(),
        });
        start += rotation_interval;
        key_idx += 1;
    }
    entries
}

/// Look up the key family active at `index` within a rotation plan.
pub fn key_for_segment(rotation: &[RotationEntry], index: u64) -> Option<&[u8]> {
    rotation
        .iter()
        .rev()
        .find(|e| e.start_index <= index)
        .map(|e| e.key.as_slice())
}

/// Encrypts completed segments under a fixed key and method.
pub struct SegmentEncryptor {
    method: EncryptionMethod,
    key: Vec<u8>,
    explicit_iv: Option<[u8; 16]>,
}

impl SegmentEncryptor {
    pub fn new(method: EncryptionMethod, key: Vec<u8>) -> Self {
        Self {
            method,
            key,
            explicit_iv: None,
        }
    }

    pub fn with_iv(mut self, iv: [u8; 16]) -> Self {
        self.explicit_iv = Some(iv);
        self
    }

    pub fn method(&self) -> EncryptionMethod {
        self.method
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// True when the IV is sequence-derived rather than explicit (drives
    /// whether `PlaylistDecorator` emits an `IV=` attribute).
    pub fn iv_is_sequence_derived(&self) -> bool {
        self.explicit_iv.is_none()
    }

    pub fn iv_for(&self, sequence_index: u64) -> [u8; 16] {
        self.explicit_iv.unwrap_or_else(|| derive_iv(sequence_index))
    }

    /// Encrypt one completed segment's bytes at 0-based sequence `index`.
    pub fn encrypt_segment(&self, index: u64, data: &[u8]) -> Result<Bytes, CryptoError> {
        match self.method {
            EncryptionMethod::Aes128Cbc => {
                let iv = self.iv_for(index);
                let ciphertext = AesCbc::encrypt(data, &self.key, &iv)?;
                Ok(Bytes::from(ciphertext))
            }
            EncryptionMethod::SampleAes => {
                let iv = self.iv_for(index);
                let mut buf = data.to_vec();
                encrypt_ts_sample_aes(&mut buf, &self.key, &iv)?;
                Ok(Bytes::from(buf))
            }
            EncryptionMethod::SampleAesCtr => {
                Err(CryptoError::UnsupportedMethod("SAMPLE-AES-CTR".to_string()))
            }
        }
    }
}

struct PesAssembly {
    kind: Codec,
    buffer: Vec<u8>,
    /// `(packet_start, payload_start_in_packet, payload_len)` for scatter-back.
    spans: Vec<(usize, usize, usize)>,
}

/// Walk a muxed MPEG-TS buffer in place, SAMPLE-AES-encrypting each video
/// NALU's/audio ADTS frame's encrypted span while leaving PAT/PMT and
/// clear-header bytes untouched. Output size always equals input size.
pub fn encrypt_ts_sample_aes(ts: &mut [u8], key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if ts.len() % TS_PACKET_SIZE != 0 {
        return Err(CryptoError::CryptoFailed(format!(
            "TS buffer length {} is not a multiple of {TS_PACKET_SIZE}",
            ts.len()
        )));
    }

    let pid_kinds = discover_pid_kinds(ts);
    if pid_kinds.is_empty() {
        return Ok(());
    }

    let packet_count = ts.len() / TS_PACKET_SIZE;
    let mut assemblies: HashMap<u16, PesAssembly> = HashMap::new();

    for pkt_idx in 0..packet_count {
        let pkt_start = pkt_idx * TS_PACKET_SIZE;
        let (pid, kind, pusi, has_payload, payload_start, payload_len) = {
            let packet = &ts[pkt_start..pkt_start + TS_PACKET_SIZE];
            if packet[0] != TS_SYNC_BYTE {
                (0u16, None, false, false, 0usize, 0usize)
            } else {
                let pid = (((packet[1] & 0x1F) as u16) << 8) | packet[2] as u16;
                let kind = pid_kinds.get(&pid).copied();
                let pusi = packet[1] & 0x40 != 0;
                let afc = (packet[3] & 0x30) >> 4;
                let has_payload = afc == 1 || afc == 3;
                let payload_start = if afc == 3 { 5 + packet[4] as usize } else { 4 };
                let payload_len = TS_PACKET_SIZE.saturating_sub(payload_start);
                (pid, kind, pusi, has_payload, payload_start, payload_len)
            }
        };

        let Some(kind) = kind else { continue };
        if !has_payload || payload_len == 0 || payload_start >= TS_PACKET_SIZE {
            continue;
        }

        if pusi {
            if let Some(prev) = assemblies.remove(&pid) {
                finalize_pes(ts, prev, key, iv)?;
            }
        }

        let entry = assemblies.entry(pid).or_insert_with(|| PesAssembly {
            kind,
            buffer: Vec::new(),
            spans: Vec::new(),
        });
        entry
            .buffer
            .extend_from_slice(&ts[pkt_start + payload_start..pkt_start + payload_start + payload_len]);
        entry.spans.push((pkt_start, payload_start, payload_len));
    }

    for (_pid, assembly) in assemblies {
        finalize_pes(ts, assembly, key, iv)?;
    }

    Ok(())
}

fn finalize_pes(ts: &mut [u8], assembly: PesAssembly, key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    let mut buffer = assembly.buffer;
    if buffer.len() < 9 {
        return Ok(());
    }
    let header_data_length = buffer[8] as usize;
    let es_start = 9 + header_data_length;
    if es_start >= buffer.len() {
        return Ok(());
    }

    let elementary = buffer[es_start..].to_vec();
    match assembly.kind {
        Codec::H264 | Codec::H265 => {
            for nalu in sample_codec::scan_annex_b(&elementary) {
                let offset = (nalu.header.as_ptr() as usize) - (elementary.as_ptr() as usize);
                let body_len = nalu.header.len() + nalu.body.len();
                if let Some(plan) = sample_codec::plan_h264_sample_aes(body_len) {
                    encrypt_span(&mut buffer, es_start + offset + plan.clear_prefix, plan.encrypted_len(), key, iv)?;
                }
            }
        }
        Codec::Aac => {
            for (offset, body_len) in sample_codec::scan_adts_frames(&elementary) {
                if let Some(plan) = sample_codec::plan_adts_sample_aes(body_len) {
                    encrypt_span(&mut buffer, es_start + offset + 7 + plan.clear_prefix, plan.encrypted_len(), key, iv)?;
                }
            }
        }
        _ => {}
    }

    let mut consumed = 0;
    for (pkt_start, payload_start, len) in assembly.spans {
        let end = consumed + len;
        if end > buffer.len() {
            break;
        }
        ts[pkt_start + payload_start..pkt_start + payload_start + len].copy_from_slice(&buffer[consumed..end]);
        consumed = end;
    }
    Ok(())
}

fn encrypt_span(buffer: &mut [u8], start: usize, len: usize, key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if len == 0 || start + len > buffer.len() {
        return Ok(());
    }
    AesCbc::encrypt_blocks_in_place(&mut buffer[start..start + len], key, iv)
}

fn discover_pid_kinds(ts: &[u8]) -> HashMap<u16, Codec> {
    let packet_count = ts.len() / TS_PACKET_SIZE;
    let mut pmt_pid = None;

    for i in 0..packet_count {
        let pkt = &ts[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE];
        if pkt[0] != TS_SYNC_BYTE {
            continue;
        }
        let pid = (((pkt[1] & 0x1F) as u16) << 8) | pkt[2] as u16;
        if pid != PID_PAT {
            continue;
        }
        let pointer = pkt[4] as usize;
        let section_start = 5 + pointer;
        if section_start + 8 > pkt.len() {
            continue;
        }
        let section = &pkt[section_start..];
        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        let entries_end = (3 + section_length).saturating_sub(4).min(section.len());
        let mut j = 8;
        while j + 4 <= entries_end {
            let program_number = ((section[j] as u16) << 8) | section[j + 1] as u16;
            let entry_pid = (((section[j + 2] & 0x1F) as u16) << 8) | section[j + 3] as u16;
            if program_number != 0 {
                pmt_pid = Some(entry_pid);
            }
            j += 4;
        }
        break;
    }

    let mut kinds = HashMap::new();
    let Some(pmt_pid) = pmt_pid else {
        return kinds;
    };

    for i in 0..packet_count {
        let pkt = &ts[i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE];
        if pkt[0] != TS_SYNC_BYTE {
            continue;
        }
        let pid = (((pkt[1] & 0x1F) as u16) << 8) | pkt[2] as u16;
        if pid != pmt_pid {
            continue;
        }
        let pointer = pkt[4] as usize;
        let section_start = 5 + pointer;
        if section_start + 12 > pkt.len() {
            continue;
        }
        let section = &pkt[section_start..];
        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        let program_info_length = (((section[10] & 0x0F) as usize) << 8) | section[11] as usize;
        let entries_end = (3 + section_length).saturating_sub(4).min(section.len());
        let mut j = 12 + program_info_length;
        while j + 5 <= entries_end {
            let stream_type = section[j];
            let elementary_pid = (((section[j + 1] & 0x1F) as u16) << 8) | section[j + 2] as u16;
            let es_info_length = (((section[j + 3] & 0x0F) as usize) << 8) | section[j + 4] as usize;
            let codec = match stream_type {
                0x1B => Some(Codec::H264),
                0x0F => Some(Codec::Aac),
                _ => None,
            };
            if let Some(codec) = codec {
                kinds.insert(elementary_pid, codec);
            }
            j += 5 + es_info_length;
        }
        break;
    }
    kinds
}

/// Options for [`encrypt_directory`].
pub struct DirectoryEncryptOptions {
    pub write_key_file: bool,
    pub key_filename: String,
}

impl Default for DirectoryEncryptOptions {
    fn default() -> Self {
        Self {
            write_key_file: false,
            key_filename: "key.bin".to_string(),
        }
    }
}

/// Encrypt each named segment file under `prefix` in place, and optionally
/// write the key alongside.
pub async fn encrypt_directory(
    op: &opendal::Operator,
    prefix: &str,
    filenames: &[String],
    encryptor: &SegmentEncryptor,
    options: DirectoryEncryptOptions,
) -> Result<(), CryptoError> {
    for (i, filename) in filenames.iter().enumerate() {
        let path = format!("{prefix}/{filename}");
        let data = op
            .read(&path)
            .await
            .map_err(|e| CryptoError::SegmentNotFound(format!("{path}: {e}")))?
            .to_vec();
        let encrypted = encryptor.encrypt_segment(i as u64, &data)?;
        op.write(&path, encrypted.to_vec())
            .await
            .map_err(|e| CryptoError::CryptoFailed(format!("failed to write {path}: {e}")))?;
        debug!(path = %path, "[encryptor] encrypted segment in place");
    }

    if options.write_key_file {
        let key_path = format!("{prefix}/{}", options.key_filename);
        op.write(&key_path, encryptor.key().to_vec())
            .await
            .map_err(|e| CryptoError::CryptoFailed(format!("failed to write key file {key_path}: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ts::TsMuxer;
    use crate::types::{EncodedFrame, Timestamp};

    fn h264_frame(ts: f64, payload: &[u8]) -> EncodedFrame {
        let mut nalu = Vec::new();
        nalu.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        nalu.extend_from_slice(payload);
        EncodedFrame::new(Bytes::from(nalu), Timestamp::from_secs(ts), Timestamp::from_secs(1.0 / 30.0), true, Codec::H264)
    }

    #[test]
    fn derive_iv_packs_index_in_low_bytes() {
        let iv = derive_iv(0x0102_0304_0506_0708);
        assert_eq!(&iv[0..8], &[0u8; 8]);
        assert_eq!(&iv[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn whole_segment_round_trips() {
        let encryptor = SegmentEncryptor::new(EncryptionMethod::Aes128Cbc, vec![0x42u8; 16]);
        let data = b"a completed media segment".to_vec();
        let ciphertext = encryptor.encrypt_segment(3, &data).unwrap();
        assert_ne!(ciphertext.as_ref(), data.as_slice());

        let iv = encryptor.iv_for(3);
        let plaintext = AesCbc::decrypt(&ciphertext, encryptor.key(), &iv).unwrap();
        assert_eq!(plaintext, data);
    }

    #[test]
    fn sample_aes_preserves_ts_size_and_clear_headers() {
        let mut muxer = TsMuxer::new();
        let mut payload = vec![0x65u8]; // NAL header (slice)
        payload.extend(std::iter::repeat(0xABu8).take(100));
        let frame = h264_frame(0.0, &payload);
        let ts = muxer.build_segment(&[frame]).unwrap();
        let original = ts.to_vec();

        let mut buf = original.clone();
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        encrypt_ts_sample_aes(&mut buf, &key, &iv).unwrap();

        assert_eq!(buf.len(), original.len());
        assert_ne!(buf, original);

        // PAT/PMT packets (first two) are untouched.
        assert_eq!(&buf[..2 * TS_PACKET_SIZE], &original[..2 * TS_PACKET_SIZE]);
    }

    #[test]
    fn sample_aes_ctr_is_rejected() {
        let encryptor = SegmentEncryptor::new(EncryptionMethod::SampleAesCtr, vec![0u8; 16]);
        let err = encryptor.encrypt_segment(0, b"data").unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedMethod(_)));
    }

    #[test]
    fn encryption_config_deserializes_with_defaults() {
        let config: EncryptionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.method, EncryptionMethod::Aes128Cbc);
        assert_eq!(config.rotation_interval, 0);
        assert!(!config.write_key_file);
        assert_eq!(config.key_filename, "key.bin");
    }

    #[test]
    fn rotation_plan_starts_windows_at_multiples_of_interval() {
        let keys = vec![vec![1u8; 16], vec![2u8; 16], vec![3u8; 16]];
        let plan = plan_rotation(6, 2, &keys);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].start_index, 0);
        assert_eq!(plan[1].start_index, 2);
        assert_eq!(plan[2].start_index, 4);
        assert_eq!(key_for_segment(&plan, 3), Some(plan[1].key.as_slice()));
        assert_eq!(key_for_segment(&plan, 5), Some(plan[2].key.as_slice()));
    }

    #[test]
    fn generated_rotation_keys_are_16_bytes_and_distinct() {
        let keys = generate_rotation_keys(4);
        assert_eq!(keys.len(), 4);
        for key in &keys {
            assert_eq!(key.len(), 16);
        }
        assert_ne!(keys[0], keys[1]);
    }
}
