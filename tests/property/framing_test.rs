// tests/property/framing_test.rs

//! Property-based tests for frame extraction
//! Tests that payloads survive arbitrary chunking of the byte stream

use bytes::{Bytes, BytesMut};
use commlink::connection::{Connection, ConnectionBuffer, ConnectionOptions};
use commlink::core::protocol::FrameCodec;
use proptest::prelude::*;
use tokio_util::codec::Encoder;

/// Cuts `stream` at the given fractions of its length.
fn split_points(stream: &[u8], cuts: &[prop::sample::Index]) -> Vec<Bytes> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
    points.push(0);
    points.push(stream.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| Bytes::copy_from_slice(&stream[w[0]..w[1]]))
        .collect()
}

fn encode_all(codec: &FrameCodec, payloads: &[Vec<u8>]) -> BytesMut {
    let mut codec = codec.clone();
    let mut stream = BytesMut::new();
    for payload in payloads {
        codec
            .encode(Bytes::copy_from_slice(payload), &mut stream)
            .unwrap();
    }
    stream
}

fn receive_in_chunks(codec: FrameCodec, chunks: &[Bytes]) -> Vec<Bytes> {
    let options = ConnectionOptions {
        codec,
        ..ConnectionOptions::default()
    };
    let (connection, _peer) = Connection::pair(&options);
    for chunk in chunks {
        connection.receive(chunk).unwrap();
    }
    assert!(connection.buffer().is_empty());
    connection.drain()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_length_prefixed_frames_survive_any_split(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30)
    ) {
        let codec = FrameCodec::length_prefixed(1024);
        let stream = encode_all(&codec, &payloads);
        let frames = receive_in_chunks(codec, &split_points(&stream, &cuts));

        let expected: Vec<Bytes> = payloads.iter().map(|p| Bytes::copy_from_slice(p)).collect();
        prop_assert_eq!(frames, expected);
    }

    #[test]
    fn test_delimited_frames_survive_any_split(
        payloads in prop::collection::vec("[a-z0-9 ]{0,200}", 1..20),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..30)
    ) {
        let codec = FrameCodec::delimited(b'\n', 1024);
        let raw: Vec<Vec<u8>> = payloads.iter().map(|p| p.as_bytes().to_vec()).collect();
        let stream = encode_all(&codec, &raw);
        prop_assert_eq!(stream.len(), raw.iter().map(|p| p.len() + 1).sum::<usize>());

        let frames = receive_in_chunks(codec, &split_points(&stream, &cuts));
        let decoded: Vec<String> = frames
            .iter()
            .map(|f| String::from_utf8(f.to_vec()).unwrap())
            .collect();
        prop_assert_eq!(decoded, payloads);
    }

    #[test]
    fn test_incomplete_tail_is_held_back(
        payload in prop::collection::vec(any::<u8>(), 1..300),
        missing in 1usize..4
    ) {
        let codec = FrameCodec::length_prefixed(1024);
        let stream = encode_all(&codec, &[payload.clone()]);
        let cut = stream.len() - missing.min(payload.len());

        let options = ConnectionOptions { codec, ..ConnectionOptions::default() };
        let (connection, _peer) = Connection::pair(&options);
        prop_assert_eq!(connection.receive(&stream[..cut]).unwrap(), 0);
        prop_assert_eq!(connection.pending_frames(), 0);
        prop_assert_eq!(connection.receive(&stream[cut..]).unwrap(), 1);
        prop_assert_eq!(connection.drain(), vec![Bytes::from(payload)]);
    }

    #[test]
    fn test_buffer_take_concatenates_appends(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32)
    ) {
        let buffer = ConnectionBuffer::new();
        for chunk in &chunks {
            buffer.append(chunk);
        }
        let expected: Vec<u8> = chunks.concat();
        prop_assert_eq!(buffer.len(), expected.len());
        prop_assert_eq!(buffer.take().to_vec(), expected);
        prop_assert!(buffer.is_empty());
    }
}
