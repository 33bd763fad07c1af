//! Big-endian binary writer and ISOBMFF box framing primitives.
//!
//! Grounded on `recorder/fmp4.rs`'s `make_box`/`be_u32` helpers and the
//! `BigEndian::write_u32` in-place patch used to resolve `trun.data_offset`,
//! generalized into a reusable writer so the ISOBMFF and MPEG-TS writers
//! share one framing primitive instead of duplicating byte-pushing code.

use crate::error::MuxerError;

/// A growable big-endian byte buffer with box-framing helpers.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn fourcc(&mut self, v: &[u8; 4]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.extend(std::iter::repeat(0u8).take(n));
        self
    }

    /// Write a 16.16 fixed-point number (used for `mvhd.rate`, `tkhd` width/height, ...).
    pub fn fixed16_16(&mut self, v: f64) -> &mut Self {
        let fixed = (v * 65536.0).round() as i64;
        self.u32(fixed as u32)
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Overwrite the 4 bytes at `offset` with `value`'s big-endian encoding.
    /// Used for the two-pass `trun.data_offset` fix-up.
    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        patch_i32(&mut self.buf, offset, value);
    }

    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        patch_u32(&mut self.buf, offset, value);
    }
}

/// Overwrite the 4 bytes at `offset` in `buf` with `value`'s big-endian encoding.
pub fn patch_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn patch_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// `size(u32) || type(fourcc) || payload`. Fails only if the total size
/// would overflow a 32-bit box size field.
pub fn write_box(box_type: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>, MuxerError> {
    let total = 8usize
        .checked_add(payload.len())
        .ok_or_else(|| MuxerError::BoxSizeOverflow(*box_type, payload.len()))?;
    if total > u32::MAX as usize {
        return Err(MuxerError::BoxSizeOverflow(*box_type, payload.len()));
    }
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    Ok(out)
}

/// A "full box" prepends an 8-bit version and a 24-bit flags field ahead of
/// the payload (ISOBMFF `FullBox`).
pub fn write_full_box(
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
    payload: &[u8],
) -> Result<Vec<u8>, MuxerError> {
    let flags_be = flags.to_be_bytes();
    let mut full_payload = Vec::with_capacity(4 + payload.len());
    full_payload.push(version);
    full_payload.extend_from_slice(&flags_be[1..4]);
    full_payload.extend_from_slice(payload);
    write_box(box_type, &full_payload)
}

/// Concatenate already-serialized child boxes and wrap them in a container box.
pub fn write_container(box_type: &[u8; 4], children: &[Vec<u8>]) -> Result<Vec<u8>, MuxerError> {
    let total_children: usize = children.iter().map(Vec::len).sum();
    let mut payload = Vec::with_capacity(total_children);
    for child in children {
        payload.extend_from_slice(child);
    }
    write_box(box_type, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_box_framing() {
        let b = write_box(b"test", &[1, 2, 3]).unwrap();
        assert_eq!(b.len(), 11);
        assert_eq!(&b[0..4], &11u32.to_be_bytes());
        assert_eq!(&b[4..8], b"test");
        assert_eq!(&b[8..], &[1, 2, 3]);
    }

    #[test]
    fn write_full_box_prepends_version_and_flags() {
        let b = write_full_box(b"tfhd", 1, 0x02_0000, &[9, 9]).unwrap();
        // size(4) + type(4) + version(1) + flags(3) + payload(2)
        assert_eq!(b.len(), 14);
        assert_eq!(b[8], 1); // version
        assert_eq!(&b[9..12], &[0x00, 0x02, 0x00]); // flags u24
        assert_eq!(&b[12..], &[9, 9]);
    }

    #[test]
    fn write_container_concatenates_children() {
        let a = write_box(b"aaaa", &[1]).unwrap();
        let b = write_box(b"bbbb", &[2, 2]).unwrap();
        let container = write_container(b"ctnr", &[a.clone(), b.clone()]).unwrap();
        assert_eq!(container.len(), 8 + a.len() + b.len());
        assert_eq!(&container[8..8 + a.len()], &a[..]);
    }

    #[test]
    fn patch_i32_rewrites_in_place() {
        let mut w = BinaryWriter::new();
        w.u32(0);
        w.patch_i32(0, 1234);
        assert_eq!(w.as_slice(), &1234i32.to_be_bytes());
    }

    #[test]
    fn fixed16_16_encodes_integer_part_in_high_word() {
        let mut w = BinaryWriter::new();
        w.fixed16_16(1.0);
        assert_eq!(w.as_slice(), &0x0001_0000u32.to_be_bytes());
    }
}
