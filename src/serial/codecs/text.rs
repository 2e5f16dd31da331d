use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::serial::{error::SerialPortError, SerialMessageBytes};

/// This codec yields whatever text is available on the wire, without looking for delimiters.
///
/// The REPL prompt is not newline terminated, so framing by lines would stall on it.
/// A UTF-8 sequence split across two reads is held back until it is complete.
/// Bytes which are not valid UTF-8 are replaced lossily.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCodec;

impl TextCodec {
    /// How many leading bytes of `bytes` can be decoded right now.
    fn decodable_len(bytes: &[u8]) -> usize {
        match std::str::from_utf8(bytes) {
            Ok(_) => bytes.len(),
            // Incomplete sequence at the very end, wait for the rest of it.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Garbage in the middle; nothing to wait for.
            Err(_) => bytes.len(),
        }
    }
}

impl Decoder for TextCodec {
    type Item = String;
    type Error = SerialPortError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let decodable = Self::decodable_len(&src[..]);

        if decodable == 0 {
            return Ok(None);
        }

        let text = src.split_to(decodable);

        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // The stream ended, a dangling partial sequence will never complete.
        let text = src.split_to(src.len());

        Ok(Some(String::from_utf8_lossy(&text).into_owned()))
    }
}

impl Encoder<SerialMessageBytes> for TextCodec {
    type Error = SerialPortError;

    fn encode(&mut self, item: SerialMessageBytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_ascii_is_yielded_as_is() {
        let mut codec = TextCodec::default();
        let mut buf = BytesMut::from(&b">>> "[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(">>> ".to_string()));
        assert!(buf.is_empty());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn split_sequence_is_held_back() {
        let mut codec = TextCodec::default();

        // "é" is 0xC3 0xA9
        let mut buf = BytesMut::from(&b"caf\xC3"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("caf".to_string()));
        assert_eq!(&buf[..], b"\xC3");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\xA9!");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("é!".to_string()));
    }

    #[test]
    fn garbage_is_replaced() {
        let mut codec = TextCodec::default();
        let mut buf = BytesMut::from(&b"a\xFFb"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("a\u{FFFD}b".to_string())
        );
    }

    #[test]
    fn dangling_sequence_is_flushed_at_eof() {
        let mut codec = TextCodec::default();
        let mut buf = BytesMut::from(&b"\xE2\x82"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some("\u{FFFD}".to_string())
        );
    }

    #[test]
    fn encodes_bytes_verbatim() {
        let mut codec = TextCodec::default();
        let mut dst = BytesMut::new();

        codec.encode(b"\x03".to_vec(), &mut dst).unwrap();
        codec.encode(b"reset()\r".to_vec(), &mut dst).unwrap();

        assert_eq!(&dst[..], b"\x03reset()\r");
    }
}
