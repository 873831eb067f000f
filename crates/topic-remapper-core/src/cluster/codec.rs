//! Admin protocol frame codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for broker admin frames:
//! a 4-byte big-endian length prefix, then a 4-byte correlation ID, then the
//! JSON body. The length covers the correlation ID and the body.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (16 MB by default).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes taken by the correlation ID.
const HEADER_LEN: usize = 4;

/// One admin request or response on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminFrame {
    /// Correlation ID; a response echoes its request's.
    pub correlation_id: i32,
    /// JSON-encoded body.
    pub payload: Bytes,
}

/// Codec for admin frames, used on both ends of the connection.
#[derive(Debug, Clone)]
pub struct AdminCodec {
    max_frame_size: usize,
}

impl AdminCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for AdminCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AdminCodec {
    type Item = AdminFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame size {length} exceeds maximum {}",
                    self.max_frame_size
                ),
            ));
        }
        if length < HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame too small for correlation id",
            ));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let correlation_id = src.get_i32();
        let payload = src.split_to(length - HEADER_LEN).freeze();

        Ok(Some(AdminFrame {
            correlation_id,
            payload,
        }))
    }
}

impl Encoder<AdminFrame> for AdminCodec {
    type Error = io::Error;

    fn encode(&mut self, item: AdminFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_len = HEADER_LEN + item.payload.len();
        if total_len > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame size {total_len} exceeds maximum {}",
                    self.max_frame_size
                ),
            ));
        }
        let length = u32::try_from(total_len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;

        dst.reserve(4 + total_len);
        dst.put_u32(length);
        dst.put_i32(item.correlation_id);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_frame(correlation_id: i32, body: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32((HEADER_LEN + body.len()) as u32);
        buf.put_i32(correlation_id);
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_decode_valid_frame() {
        let mut codec = AdminCodec::new();
        let mut buf = raw_frame(12345, b"{\"x\":1}");

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 12345);
        assert_eq!(&frame.payload[..], b"{\"x\":1}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_length() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_i32(1);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = AdminCodec::with_max_frame_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_frame_without_header() {
        let mut codec = AdminCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u16(0);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_layout() {
        let mut codec = AdminCodec::new();
        let mut dst = BytesMut::new();

        codec
            .encode(
                AdminFrame {
                    correlation_id: 7,
                    payload: Bytes::from_static(&[1, 2, 3, 4]),
                },
                &mut dst,
            )
            .unwrap();

        assert_eq!(dst.len(), 12);
        assert_eq!(u32::from_be_bytes([dst[0], dst[1], dst[2], dst[3]]), 8);
        assert_eq!(i32::from_be_bytes([dst[4], dst[5], dst[6], dst[7]]), 7);
        assert_eq!(&dst[8..12], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut codec = AdminCodec::with_max_frame_size(8);
        let mut dst = BytesMut::new();
        let result = codec.encode(
            AdminFrame {
                correlation_id: 1,
                payload: Bytes::from_static(&[0; 16]),
            },
            &mut dst,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = AdminCodec::new();
        let mut buf = raw_frame(1, b"a");
        buf.extend_from_slice(&raw_frame(2, b"bc"));

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().correlation_id, 1);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.correlation_id, 2);
        assert_eq!(&second.payload[..], b"bc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
