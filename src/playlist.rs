//! `#EXT-X-KEY` injection into an externally-built playlist.
//!
//! The method/attribute modeling is grounded on
//! `other_examples/f991ded5_raibu-stream-hls-playlist__src-lib.rs.rs`'s
//! `EncryptionMethod` enum and its `serialize` method, adapted from that
//! crate's owned-playlist-builder model to a pure text decorator that
//! injects tags into playlist text built elsewhere.

use crate::encryptor::EncryptionMethod;

/// Encryption method as it appears in an `EXT-X-KEY` tag, including the
/// `NONE` case the core encryptor has no variant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128Cbc,
    SampleAes,
    SampleAesCtr,
}

impl KeyMethod {
    fn as_str(self) -> &'static str {
        match self {
            KeyMethod::None => "NONE",
            KeyMethod::Aes128Cbc => "AES-128",
            KeyMethod::SampleAes => "SAMPLE-AES",
            KeyMethod::SampleAesCtr => "SAMPLE-AES-CTR",
        }
    }
}

impl From<EncryptionMethod> for KeyMethod {
    fn from(method: EncryptionMethod) -> Self {
        match method {
            EncryptionMethod::Aes128Cbc => KeyMethod::Aes128Cbc,
            EncryptionMethod::SampleAes => KeyMethod::SampleAes,
            EncryptionMethod::SampleAesCtr => KeyMethod::SampleAesCtr,
        }
    }
}

/// `KEYFORMAT`/`KEYFORMATVERSIONS` attributes, present only for non-default
/// key formats (e.g. FairPlay/Widevine key systems).
#[derive(Debug, Clone)]
pub struct KeyFormat {
    pub format: String,
    pub versions: String,
}

/// One rotation window: the segment index it starts at, and the key
/// attributes to advertise for every segment in that window.
#[derive(Debug, Clone)]
pub struct RotationBoundary {
    pub start_index: u64,
    pub method: KeyMethod,
    pub key_uri: String,
    /// `Some` only when the IV is explicit; sequence-derived IVs omit the
    /// attribute entirely.
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<KeyFormat>,
}

/// Injects `#EXT-X-KEY:` lines into playlist text built elsewhere.
pub struct PlaylistDecorator;

impl PlaylistDecorator {
    /// `start_index` is the `Segment.index` of the first `#EXTINF` line in
    /// `playlist`; boundaries are matched against indices counted forward
    /// from there. Passes the playlist through unchanged if `boundaries` is
    /// empty.
    pub fn decorate(playlist: &str, start_index: u64, boundaries: &[RotationBoundary]) -> String {
        if boundaries.is_empty() {
            return playlist.to_string();
        }

        let mut pending: std::collections::HashMap<u64, &RotationBoundary> =
            boundaries.iter().map(|b| (b.start_index, b)).collect();

        let mut out = String::with_capacity(playlist.len() + boundaries.len() * 64);
        let mut index = start_index;

        for line in playlist.lines() {
            if line.starts_with("#EXTINF") {
                if let Some(boundary) = pending.remove(&index) {
                    out.push_str(&format_key_tag(boundary));
                    out.push('\n');
                }
                index += 1;
            }
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

fn format_key_tag(boundary: &RotationBoundary) -> String {
    if boundary.method == KeyMethod::None {
        return "#EXT-X-KEY:METHOD=NONE".to_string();
    }

    let mut tag = format!(
        "#EXT-X-KEY:METHOD={},URI=\"{}\"",
        boundary.method.as_str(),
        boundary.key_uri
    );
    if let Some(iv) = boundary.iv {
        tag.push_str(&format!(",IV=0x{}", hex_upper(&iv)));
    }
    if let Some(format) = &boundary.key_format {
        tag.push_str(&format!(
            ",KEYFORMAT=\"{}\",KEYFORMATVERSIONS=\"{}\"",
            format.format, format.versions
        ));
    }
    tag
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_playlist() -> String {
        let mut p = String::from("#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:6\n");
        for i in 0..6 {
            p.push_str(&format!("#EXTINF:6.0,\nseg_{i:04}.ts\n"));
        }
        p
    }

    #[test]
    fn passthrough_when_no_boundaries() {
        let playlist = sample_playlist();
        assert_eq!(PlaylistDecorator::decorate(&playlist, 0, &[]), playlist);
    }

    #[test]
    fn injects_key_tag_before_extinf_at_each_rotation_start() {
        let playlist = sample_playlist();
        let boundaries: Vec<RotationBoundary> = [0u64, 2, 4]
            .iter()
            .map(|&start| RotationBoundary {
                start_index: start,
                method: KeyMethod::Aes128Cbc,
                key_uri: "https://example.com/key".to_string(),
                iv: None,
                key_format: None,
            })
            .collect();

        let decorated = PlaylistDecorator::decorate(&playlist, 0, &boundaries);
        let key_lines: Vec<&str> = decorated
            .lines()
            .filter(|l| l.starts_with("#EXT-X-KEY"))
            .collect();
        assert_eq!(key_lines.len(), 3);
        for line in &key_lines {
            assert!(!line.contains("IV="));
        }

        let lines: Vec<&str> = decorated.lines().collect();
        let key_idx = lines.iter().position(|l| l.starts_with("#EXT-X-KEY")).unwrap();
        assert_eq!(lines[key_idx + 1], "#EXTINF:6.0,");
    }

    #[test]
    fn explicit_iv_is_rendered_as_hex() {
        let playlist = sample_playlist();
        let mut iv = [0u8; 16];
        iv[15] = 1;
        let boundaries = vec![RotationBoundary {
            start_index: 0,
            method: KeyMethod::SampleAes,
            key_uri: "https://example.com/key".to_string(),
            iv: Some(iv),
            key_format: None,
        }];
        let decorated = PlaylistDecorator::decorate(&playlist, 0, &boundaries);
        assert!(decorated.contains("IV=0x00000000000000000000000000000001"));
        assert!(decorated.contains("METHOD=SAMPLE-AES"));
    }

    #[test]
    fn method_none_omits_uri_and_iv() {
        let playlist = sample_playlist();
        let boundaries = vec![RotationBoundary {
            start_index: 0,
            method: KeyMethod::None,
            key_uri: String::new(),
            iv: None,
            key_format: None,
        }];
        let decorated = PlaylistDecorator::decorate(&playlist, 0, &boundaries);
        assert!(decorated.contains("#EXT-X-KEY:METHOD=NONE"));
        assert!(!decorated.contains("URI="));
    }
}
