//! End-to-end scenarios wiring the segmenter, muxers, encryption, and
//! playlist decoration together the way a caller actually would, rather
//! than exercising one module in isolation.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use livehls::encryptor::{plan_rotation, EncryptionMethod, SegmentEncryptor};
use livehls::playlist::{KeyMethod, PlaylistDecorator, RotationBoundary};
use livehls::ring_buffer::Capacity;
use livehls::ts::TsMuxer;
use livehls::{Codec, EncodedFrame, Segmenter, SegmenterConfig, Timestamp};

fn h264_frame(ts: f64, keyframe: bool) -> EncodedFrame {
    let payload = if keyframe { 0x65u8 } else { 0x41u8 };
    let mut nalu = Vec::new();
    let body = [payload; 64];
    nalu.extend_from_slice(&(body.len() as u32).to_be_bytes());
    nalu.extend_from_slice(&body);
    EncodedFrame::new(Bytes::from(nalu), Timestamp::from_secs(ts), Timestamp::from_secs(1.0 / 30.0), keyframe, Codec::H264)
}

/// Segments a video stream into real MPEG-TS containers, SAMPLE-AES
/// encrypts each under a rotating key, and checks the resulting playlist
/// carries one `#EXT-X-KEY` tag per rotation window with matching ciphertext.
#[tokio::test]
async fn ts_segments_survive_sample_aes_rotation_and_playlist_decoration() {
    let muxer = Arc::new(Mutex::new(TsMuxer::new()));
    let transform_muxer = muxer.clone();
    let mut config = SegmenterConfig::new(Timestamp::from_secs(1.0), true, "v_{index}.ts");
    config.transform = Some(Arc::new(move |_index, frames: &[EncodedFrame]| {
        transform_muxer
            .lock()
            .unwrap()
            .build_segment(frames)
            .map_err(livehls::CoreError::from)
    }));
    let (segmenter, mut rx) = Segmenter::new(config);

    for gop in 0..4u64 {
        for i in 0..30u64 {
            let ts = (gop * 30 + i) as f64 / 30.0;
            segmenter.ingest(h264_frame(ts, i == 0)).await.unwrap();
        }
    }
    segmenter.finish().await;

    let mut segments = Vec::new();
    while let Ok(seg) = rx.try_recv() {
        segments.push(seg);
    }
    assert_eq!(segments.len(), 4);

    let keys = vec![vec![0x11u8; 16], vec![0x22u8; 16]];
    let rotation = plan_rotation(segments.len() as u64, 2, &keys);
    assert_eq!(rotation.len(), 2);

    let mut encrypted_segments = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        let key = livehls::encryptor::key_for_segment(&rotation, i as u64).unwrap().to_vec();
        let encryptor = SegmentEncryptor::new(EncryptionMethod::SampleAes, key);
        let ciphertext = encryptor.encrypt_segment(i as u64, &seg.data).unwrap();
        assert_eq!(ciphertext.len(), seg.data.len());
        assert_ne!(ciphertext.as_ref(), seg.data.as_ref());
        encrypted_segments.push(ciphertext);
    }

    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:1\n");
    for seg in &segments {
        playlist.push_str(&format!("#EXTINF:{:.3},\n{}\n", seg.duration.seconds(), seg.filename));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");

    let boundaries: Vec<RotationBoundary> = rotation
        .iter()
        .enumerate()
        .map(|(i, entry)| RotationBoundary {
            start_index: entry.start_index,
            method: KeyMethod::from(EncryptionMethod::SampleAes),
            key_uri: format!("key-{i}.bin"),
            iv: None,
            key_format: None,
        })
        .collect();

    let decorated = PlaylistDecorator::decorate(&playlist, 0, &boundaries);
    let key_tag_count = decorated.lines().filter(|l| l.starts_with("#EXT-X-KEY")).count();
    assert_eq!(key_tag_count, 2);
    assert!(decorated.contains("METHOD=SAMPLE-AES"));
}

/// A bounded ring buffer behind a live `Segmenter` only ever retains the
/// most recent `capacity` segments, addressable by their original index.
#[tokio::test]
async fn bounded_segmenter_ring_buffer_evicts_oldest() {
    let mut config = SegmenterConfig::new(Timestamp::from_secs(0.5), false, "a_{index}.aac");
    config.ring_buffer_size = Capacity::Bounded(3);
    let (segmenter, mut rx) = Segmenter::new(config);

    let frame_dur = 1024.0 / 48_000.0;
    let mut ts = 0.0;
    for _ in 0..5 {
        // enough frames per segment to cross the 0.5s target at least once
        for _ in 0..30 {
            segmenter
                .ingest(EncodedFrame::new(
                    Bytes::from_static(&[0u8; 4]),
                    Timestamp::from_secs(ts),
                    Timestamp::from_secs(frame_dur),
                    false,
                    Codec::Aac,
                ))
                .await
                .unwrap();
            ts += frame_dur;
        }
    }
    segmenter.finish().await;

    let mut last_seen = None;
    while let Ok(seg) = rx.try_recv() {
        last_seen = Some(seg);
    }
    let last_index = last_seen.unwrap().index;
    assert!(last_index >= 4, "expected at least 5 segments, got last index {last_index}");

    assert_eq!(segmenter.buffered_segment_count().await, 3);
    assert!(segmenter.get_buffered(0).await.is_none());
    let newest = segmenter.get_buffered(last_index).await.unwrap();
    assert_eq!(newest.index, last_index);
}
