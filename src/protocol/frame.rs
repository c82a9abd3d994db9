//! Length-prefixed framing for the sender → receiver byte stream
//!
//! ```text
//! +--------+-------------------+-----------------+
//! | kind   | length (u32, BE)  | payload         |
//! | 1 byte | 4 bytes           | `length` bytes  |
//! +--------+-------------------+-----------------+
//! ```
//!
//! Control messages (settings, stop) can never be confused with audio
//! bytes because every payload is delimited.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::format::AudioFormat;
use crate::protocol::{WireMessage, STOP_SENTINEL};

/// Size of the frame header (kind + length)
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload the decoder will buffer
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Settings = 0x01,
    Audio = 0x02,
    Stop = 0x03,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Settings),
            0x02 => Ok(FrameKind::Audio),
            0x03 => Ok(FrameKind::Stop),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// Encode a single frame
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(kind as u8);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Encode a wire message into its framed representation
pub fn encode_message(message: &WireMessage) -> Bytes {
    match message {
        WireMessage::Settings(format) => {
            encode_frame(FrameKind::Settings, format.settings_header().as_bytes())
        }
        WireMessage::Audio(data) => encode_frame(FrameKind::Audio, data),
        WireMessage::Stop => encode_frame(FrameKind::Stop, STOP_SENTINEL),
    }
}

/// Incremental decoder for framed streams
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete message, if any
    pub fn next_message(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let kind = FrameKind::try_from(self.buffer[0])?;
        let len = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge(len));
        }
        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let payload = self.buffer.split_to(len).freeze();

        let message = match kind {
            FrameKind::Settings => {
                let text = std::str::from_utf8(&payload).map_err(|_| ProtocolError::NotUtf8)?;
                WireMessage::Settings(AudioFormat::parse_settings_header(text)?)
            }
            FrameKind::Audio => WireMessage::Audio(payload),
            FrameKind::Stop => WireMessage::Stop,
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_frame_layout() {
        let frame = encode_message(&WireMessage::Stop);
        assert_eq!(&frame[..5], &[0x03, 0, 0, 0, 7]);
        assert_eq!(&frame[5..], b"stop!!!");
    }

    #[test]
    fn test_decoder_handles_split_reads() {
        let format = AudioFormat::default();
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_message(&WireMessage::Settings(format.clone())));
        stream.extend_from_slice(&encode_message(&WireMessage::Audio(Bytes::from_static(
            b"stop!!!",
        ))));
        stream.extend_from_slice(&encode_message(&WireMessage::Stop));

        let mut decoder = FrameDecoder::new();
        let mut messages = Vec::new();
        for chunk in stream.chunks(3) {
            decoder.feed(chunk);
            while let Some(message) = decoder.next_message().unwrap() {
                messages.push(message);
            }
        }

        assert_eq!(
            messages,
            vec![
                WireMessage::Settings(format),
                // audio that happens to spell the sentinel stays audio
                WireMessage::Audio(Bytes::from_static(b"stop!!!")),
                WireMessage::Stop,
            ]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x7f, 0, 0, 0, 0]);
        assert_eq!(decoder.next_message(), Err(ProtocolError::UnknownFrameKind(0x7f)));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x02, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
