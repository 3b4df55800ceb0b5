//! Wire format for the reliable-stream transport.
//!
//! Fixed 24-byte header followed by 0..=MSS bytes of payload. Every
//! multi-byte integer is big-endian. See `Segment::encode`/`decode` for the
//! exact byte layout.

use std::fmt;

pub const HEADER_LEN: usize = 24;

/// Management bits, packed high-to-low into byte 13: CWR ECE URG ACK PSH RST SYN FIN.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub cwr: bool,
    pub ece: bool,
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl Flags {
    pub const fn syn() -> Self {
        Flags { syn: true, ..Flags::new() }
    }

    pub const fn syn_ack() -> Self {
        Flags { syn: true, ack: true, ..Flags::new() }
    }

    pub const fn ack() -> Self {
        Flags { ack: true, ..Flags::new() }
    }

    pub const fn fin_ack() -> Self {
        Flags { fin: true, ack: true, ..Flags::new() }
    }

    const fn new() -> Self {
        Flags {
            cwr: false,
            ece: false,
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
        }
    }

    fn to_byte(self) -> u8 {
        ((self.cwr as u8) << 7)
            | ((self.ece as u8) << 6)
            | ((self.urg as u8) << 5)
            | ((self.ack as u8) << 4)
            | ((self.psh as u8) << 3)
            | ((self.rst as u8) << 2)
            | ((self.syn as u8) << 1)
            | (self.fin as u8)
    }

    fn from_byte(b: u8) -> Self {
        Flags {
            cwr: b & 0b1000_0000 != 0,
            ece: b & 0b0100_0000 != 0,
            urg: b & 0b0010_0000 != 0,
            ack: b & 0b0001_0000 != 0,
            psh: b & 0b0000_1000 != 0,
            rst: b & 0b0000_0100 != 0,
            syn: b & 0b0000_0010 != 0,
            fin: b & 0b0000_0001 != 0,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_no: u32,
    pub ack_no: u32,
    pub flags: Flags,
    pub rcv_window: u16,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("seq_no", &self.seq_no)
            .field("ack_no", &self.ack_no)
            .field("flags", &self.flags)
            .field("rcv_window", &self.rcv_window)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Segment {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.src_port.to_be_bytes());
        buf.extend_from_slice(&self.dst_port.to_be_bytes());
        buf.extend_from_slice(&self.seq_no.to_be_bytes());
        buf.extend_from_slice(&self.ack_no.to_be_bytes());
        buf.push((HEADER_LEN as u8) << 4);
        buf.push(self.flags.to_byte());
        buf.extend_from_slice(&self.rcv_window.to_be_bytes());
        buf.extend_from_slice(&0u16.to_be_bytes()); // checksum, filled below
        buf.extend_from_slice(&0u16.to_be_bytes()); // urg_ptr, reserved
        buf.extend_from_slice(&0u32.to_be_bytes()); // options, reserved
        buf.extend_from_slice(&self.payload);

        let cs = checksum(&buf);
        buf[16..18].copy_from_slice(&cs.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Segment> {
        if bytes.len() < HEADER_LEN {
            return None;
        }

        let src_port = u16::from_be_bytes([bytes[0], bytes[1]]);
        let dst_port = u16::from_be_bytes([bytes[2], bytes[3]]);
        let seq_no = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let ack_no = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let flags = Flags::from_byte(bytes[13]);
        let rcv_window = u16::from_be_bytes([bytes[14], bytes[15]]);
        let payload = bytes[HEADER_LEN..].to_vec();

        Some(Segment {
            src_port,
            dst_port,
            seq_no,
            ack_no,
            flags,
            rcv_window,
            payload,
        })
    }

    /// Recomputes the checksum over `bytes` (checksum field zeroed) and
    /// compares it against the carried value. Anything shorter than a full
    /// header is invalid.
    pub fn is_valid(bytes: &[u8]) -> bool {
        if bytes.len() < HEADER_LEN {
            return false;
        }

        let carried = u16::from_be_bytes([bytes[16], bytes[17]]);

        let mut zeroed = bytes.to_vec();
        zeroed[16] = 0;
        zeroed[17] = 0;

        checksum(&zeroed) == carried
    }
}

/// 16-bit one's-complement checksum: pad to an even length, sum as
/// big-endian u16 words, fold carries into the low 16 bits, complement.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut padded: &[u8] = bytes;
    let mut owned;
    if bytes.len() % 2 != 0 {
        owned = bytes.to_vec();
        owned.push(0);
        padded = &owned;
    }

    let mut sum: u32 = 0;
    for word in padded.chunks_exact(2) {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Segment {
        Segment {
            src_port: 9090,
            dst_port: 34343,
            seq_no: 12345,
            ack_no: 6789,
            flags: Flags::syn_ack(),
            rcv_window: 65535,
            payload: b"hello, world".to_vec(),
        }
    }

    #[test]
    fn round_trip() {
        let seg = sample();
        let bytes = seg.encode();
        assert!(Segment::is_valid(&bytes));

        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.src_port, seg.src_port);
        assert_eq!(decoded.dst_port, seg.dst_port);
        assert_eq!(decoded.seq_no, seg.seq_no);
        assert_eq!(decoded.ack_no, seg.ack_no);
        assert_eq!(decoded.flags, seg.flags);
        assert_eq!(decoded.rcv_window, seg.rcv_window);
        assert_eq!(decoded.payload, seg.payload);
    }

    #[test]
    fn empty_payload_round_trips() {
        let mut seg = sample();
        seg.payload.clear();
        let bytes = seg.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(Segment::is_valid(&bytes));
    }

    #[test]
    fn short_buffer_is_invalid() {
        assert!(!Segment::is_valid(&[0u8; 10]));
    }

    #[test]
    fn checksum_zero_field_property() {
        let seg = sample();
        let mut bytes = seg.encode();
        let carried = u16::from_be_bytes([bytes[16], bytes[17]]);
        bytes[16] = 0;
        bytes[17] = 0;
        assert_eq!(checksum(&bytes), carried);
    }

    #[test]
    fn single_bit_flip_invalidates_with_high_probability() {
        let seg = sample();
        let bytes = seg.encode();

        let mut flipped_count = 0;
        let mut total = 0;
        for byte_idx in 0..bytes.len() {
            for bit in 0..8u8 {
                let mut mutated = bytes.clone();
                mutated[byte_idx] ^= 1 << bit;
                total += 1;
                if !Segment::is_valid(&mutated) {
                    flipped_count += 1;
                }
            }
        }

        // Essentially every single-bit flip should be caught; a 16-bit
        // checksum only misses a vanishingly small fraction of mutations.
        assert!(flipped_count as f64 / total as f64 > 0.99);
    }

    #[test]
    fn header_len_nibble_is_constant() {
        let seg = sample();
        let bytes = seg.encode();
        // HEADER_LEN (24 = 0x18) is packed into the *top* nibble of byte 12,
        // so the byte itself is 0x80, not 24; the low nibble stays reserved
        // zero.
        assert_eq!(bytes[12] >> 4, (HEADER_LEN as u8) & 0x0F);
        assert_eq!(bytes[12] & 0x0F, 0);
    }
}
