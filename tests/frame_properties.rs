//! Property tests for the frame decoder and the call codec.
//!
//! The decoder must emit identical message sequences no matter how the
//! wire bytes are sliced into reads, and the call codec must round-trip
//! any header it can encode.

use bytes::Bytes;
use oncrpc::message::{OpaqueAuth, RpcCall};
use oncrpc::record::FrameDecoder;
use oncrpc::xdr::{record_mark, XdrDecoder, XdrEncoder};
use proptest::prelude::*;

/// One message, given as its fragment payloads.
fn message_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..5)
}

/// Assemble the wire form of a message sequence.
fn wire_for(messages: &[Vec<Vec<u8>>]) -> Vec<u8> {
    let mut wire = Vec::new();
    for fragments in messages {
        for (i, fragment) in fragments.iter().enumerate() {
            let last = i == fragments.len() - 1;
            wire.extend_from_slice(&record_mark(fragment.len() as u32, last));
            wire.extend_from_slice(fragment);
        }
    }
    wire
}

proptest! {
    /// Slicing the input into reads of any size never changes what the
    /// decoder emits.
    #[test]
    fn prop_decode_is_chunking_invariant(
        messages in prop::collection::vec(message_strategy(), 1..4),
        chunk in 1..64usize,
    ) {
        let wire = wire_for(&messages);

        let mut whole = FrameDecoder::new();
        let expected = whole.feed(&wire).unwrap();

        let mut split = FrameDecoder::new();
        let mut collected = Vec::new();
        for piece in wire.chunks(chunk) {
            collected.extend(split.feed(piece).unwrap());
        }

        prop_assert_eq!(collected, expected);
        prop_assert!(split.is_empty());
    }

    /// Every reassembled message equals its fragment payloads joined in
    /// arrival order.
    #[test]
    fn prop_messages_concatenate_fragments(
        messages in prop::collection::vec(message_strategy(), 1..4),
    ) {
        let wire = wire_for(&messages);

        let mut decoder = FrameDecoder::new();
        let decoded = decoder.feed(&wire).unwrap();

        let expected: Vec<Bytes> = messages
            .iter()
            .map(|fragments| Bytes::from(fragments.concat()))
            .collect();
        prop_assert_eq!(decoded, expected);
        prop_assert!(decoder.is_empty());
    }

    /// Any call header survives an encode/decode round trip, and the
    /// cursor lands exactly on the argument bytes.
    #[test]
    fn prop_call_header_round_trip(
        xid in any::<u32>(),
        program in any::<u32>(),
        version in any::<u32>(),
        procedure in any::<u32>(),
        cred_flavor in 0u32..4,
        cred_body in prop::collection::vec(any::<u8>(), 0..64),
        args in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut call = RpcCall::new(xid, program, version, procedure);
        call.credentials = OpaqueAuth::new(cred_flavor, Bytes::from(cred_body));

        let mut enc = XdrEncoder::new();
        call.encode(&mut enc);
        enc.write_raw(&args);

        let mut dec = XdrDecoder::new(enc.into_bytes());
        let decoded = RpcCall::decode(&mut dec).unwrap();

        prop_assert_eq!(decoded, call);
        let rest = dec.read_rest();
        prop_assert_eq!(rest.as_ref(), &args[..]);
    }
}
