//! TLV (Type-Length-Value) encoding and decoding utilities.
//!
//! All ccnf messages are TLV with one-byte types and variable-length
//! lengths. This module has the low-level readers and writers plus the
//! incremental frame splitter used on stream faces.

use crate::error::CodecError;
use bytes::{BufMut, BytesMut};

/// Top-level message types.
pub const TLV_INTEREST: u8 = 0x05;
pub const TLV_CONTENT_OBJECT: u8 = 0x06;
/// Link PDU container; wraps a run of top-level messages exactly once.
pub const TLV_LINK_PDU: u8 = 0x5A;

/// Name structure.
pub const TLV_NAME: u8 = 0x07;
pub const TLV_COMPONENT: u8 = 0x08;

/// Interest selectors, in their fixed wire order.
pub const TLV_MIN_SUFFIX_COMPONENTS: u8 = 0x0D;
pub const TLV_MAX_SUFFIX_COMPONENTS: u8 = 0x0E;
pub const TLV_PUBLISHER_KEY_DIGEST: u8 = 0x0F;
pub const TLV_EXCLUDE: u8 = 0x10;
pub const TLV_ORDER_PREFERENCE: u8 = 0x11;
pub const TLV_ANSWER_ORIGIN: u8 = 0x12;
pub const TLV_SCOPE: u8 = 0x13;
pub const TLV_NONCE: u8 = 0x0A;
pub const TLV_RESPONSE_FILTER: u8 = 0x14;

/// ContentObject structure.
pub const TLV_SIGNED_INFO: u8 = 0x16;
pub const TLV_TIMESTAMP: u8 = 0x17;
pub const TLV_VERSION: u8 = 0x1A;
pub const TLV_CONTENT: u8 = 0x15;
pub const TLV_SIGNATURE: u8 = 0x18;
pub const TLV_SIGNATURE_BITS: u8 = 0x19;

/// Upper bound on a framed message; larger frames are a protocol error.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Encodes a TLV length field.
///
/// - length < 253 uses 1 byte
/// - length <= 65535 uses 3 bytes (marker 253 + u16)
/// - larger lengths use 5 bytes (marker 254 + u32)
pub fn encode_length(length: usize, buf: &mut BytesMut) {
    if length < 253 {
        buf.put_u8(length as u8);
    } else if length <= 65535 {
        buf.put_u8(253);
        buf.put_u16(length as u16);
    } else {
        buf.put_u8(254);
        buf.put_u32(length as u32);
    }
}

/// Appends a whole TLV element.
pub fn encode_tlv(tlv_type: u8, value: &[u8], buf: &mut BytesMut) {
    buf.put_u8(tlv_type);
    encode_length(value.len(), buf);
    buf.extend_from_slice(value);
}

/// Appends a TLV whose value is a minimally-encoded big-endian number.
pub fn encode_tlv_number(tlv_type: u8, value: u64, buf: &mut BytesMut) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    encode_tlv(tlv_type, &bytes[skip..], buf);
}

/// Returns the number of bytes needed to encode the given length.
pub fn length_size(length: usize) -> usize {
    if length < 253 {
        1
    } else if length <= 65535 {
        3
    } else {
        5
    }
}

/// A decoded TLV header: type, value length, and header size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tlv_type: u8,
    pub value_len: usize,
    pub header_len: usize,
}

impl Header {
    /// Total encoded size of the element this header introduces.
    pub fn total_len(&self) -> usize {
        self.header_len + self.value_len
    }
}

/// Reads a TLV header at `pos`. Fails if the header itself is truncated
/// or uses the unsupported 64-bit length marker; does not check that the
/// value fits in the buffer.
pub fn read_header(buf: &[u8], pos: usize) -> Result<Header, CodecError> {
    if pos + 2 > buf.len() {
        return Err(CodecError::Truncated(pos));
    }
    let tlv_type = buf[pos];
    let first = buf[pos + 1];
    let (value_len, header_len) = match first {
        0..=252 => (first as usize, 2),
        253 => {
            if pos + 4 > buf.len() {
                return Err(CodecError::Truncated(pos));
            }
            (u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize, 4)
        }
        254 => {
            if pos + 6 > buf.len() {
                return Err(CodecError::Truncated(pos));
            }
            (
                u32::from_be_bytes([buf[pos + 2], buf[pos + 3], buf[pos + 4], buf[pos + 5]])
                    as usize,
                6,
            )
        }
        255 => return Err(CodecError::UnsupportedLength(pos)),
    };
    Ok(Header {
        tlv_type,
        value_len,
        header_len,
    })
}

/// Reads a TLV header and checks that its value fits in the buffer.
pub fn read_element(buf: &[u8], pos: usize) -> Result<Header, CodecError> {
    let header = read_header(buf, pos)?;
    if pos + header.total_len() > buf.len() {
        return Err(CodecError::Truncated(pos));
    }
    Ok(header)
}

/// Decodes a TLV number value (1..=8 big-endian bytes).
pub fn decode_number(value: &[u8]) -> u64 {
    let mut n: u64 = 0;
    for &b in value.iter().take(8) {
        n = (n << 8) | b as u64;
    }
    n
}

/// Determines the length of the next complete frame in a stream buffer.
///
/// Returns `Ok(Some(total))` when the header is complete, `Ok(None)` when
/// more bytes are needed to even read the header, and an error for frames
/// that could never become valid.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    match read_header(buf, 0) {
        Ok(h) => {
            if h.total_len() > MAX_FRAME_SIZE {
                return Err(CodecError::Oversize {
                    kind: "frame",
                    size: h.total_len(),
                });
            }
            Ok(Some(h.total_len()))
        }
        // A truncated header just needs more bytes.
        Err(CodecError::Truncated(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_round_trip() {
        for len in [0usize, 1, 100, 252, 253, 1000, 65535, 65536, 100_000] {
            let mut buf = BytesMut::new();
            buf.put_u8(TLV_CONTENT);
            encode_length(len, &mut buf);
            // Pretend the value is there; read_header does not check it.
            let h = read_header(&buf, 0).unwrap();
            assert_eq!(h.tlv_type, TLV_CONTENT);
            assert_eq!(h.value_len, len);
            assert_eq!(h.header_len, 1 + length_size(len));
        }
    }

    #[test]
    fn number_round_trip() {
        for n in [0u64, 1, 255, 256, 65535, 20080711, u64::MAX >> 8] {
            let mut buf = BytesMut::new();
            encode_tlv_number(TLV_SCOPE, n, &mut buf);
            let h = read_element(&buf, 0).unwrap();
            assert_eq!(h.tlv_type, TLV_SCOPE);
            let value = &buf[h.header_len..h.total_len()];
            assert_eq!(decode_number(value), n);
        }
    }

    #[test]
    fn frame_len_incremental() {
        let mut buf = BytesMut::new();
        encode_tlv(TLV_INTEREST, &[0u8; 300], &mut buf);
        let frame = buf.freeze();
        // One byte at a time until the header is readable.
        assert_eq!(frame_len(&frame[..1]).unwrap(), None);
        assert_eq!(frame_len(&frame[..2]).unwrap(), None);
        // Header complete (type + marker 253 + u16).
        assert_eq!(frame_len(&frame[..4]).unwrap(), Some(frame.len()));
        assert_eq!(frame_len(&frame).unwrap(), Some(frame.len()));
    }

    #[test]
    fn frame_len_rejects_oversize() {
        let mut buf = BytesMut::new();
        buf.put_u8(TLV_INTEREST);
        buf.put_u8(254);
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(frame_len(&buf).is_err());
    }
}
