//! Integration tests for the wire codec's public surface.

use rtcp::{Flags, Segment};

#[test]
fn syn_segment_round_trips_through_encode_decode() {
    let seg = Segment {
        src_port: 9090,
        dst_port: 34343,
        seq_no: 42,
        ack_no: 0,
        flags: Flags::syn(),
        rcv_window: 65535,
        payload: Vec::new(),
    };

    let bytes = seg.encode();
    assert!(Segment::is_valid(&bytes));

    let decoded = Segment::decode(&bytes).unwrap();
    assert_eq!(decoded.seq_no, 42);
    assert!(decoded.flags.syn);
    assert!(!decoded.flags.ack);
}

#[test]
fn corrupted_segment_is_rejected() {
    let seg = Segment {
        src_port: 1,
        dst_port: 2,
        seq_no: 7,
        ack_no: 3,
        flags: Flags::ack(),
        rcv_window: 100,
        payload: b"payload bytes".to_vec(),
    };

    let mut bytes = seg.encode();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    assert!(!Segment::is_valid(&bytes));
}

#[test]
fn fin_ack_flags_set_both_bits() {
    let flags = Flags::fin_ack();
    assert!(flags.fin);
    assert!(flags.ack);
    assert!(!flags.syn);
}
