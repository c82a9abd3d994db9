//! Unframed wire mode: header text, raw audio and the bare stop marker
//!
//! The stream is the bare settings header followed by raw audio bytes,
//! with a literal `stop!!!` written when streaming stops. Nothing is
//! delimited, so decoding is best effort:
//!
//! - the header ends where the sixth field (one of the known sample type
//!   names) ends, plus one `;` in compat mode;
//! - the stop marker is recognised at the tail of a read, or in place of
//!   a header.

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::format::{AudioFormat, FIELD_SEPARATOR, HEADER_FIELDS, HEADER_MARKER};
use crate::protocol::{WireMessage, STOP_SENTINEL};

/// Names that may appear in the last header field
const SAMPLE_TYPE_TOKENS: [&str; 5] = [
    "SignedInt",
    "UnsignedInt",
    "UnSignedInt",
    "Float",
    "Unknown",
];

/// Headers longer than this are treated as garbage
const MAX_HEADER_LEN: usize = 256;

/// Encode a wire message without any framing
pub fn encode_message(message: &WireMessage) -> Bytes {
    match message {
        WireMessage::Settings(format) => Bytes::from(format.settings_header()),
        WireMessage::Audio(data) => data.clone(),
        WireMessage::Stop => Bytes::from_static(STOP_SENTINEL),
    }
}

/// Encode a wire message byte for byte as older senders did
pub fn encode_compat_message(message: &WireMessage) -> Bytes {
    match message {
        WireMessage::Settings(format) => Bytes::from(format.compat_settings_header()),
        other => encode_message(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingHeader,
    Streaming,
}

/// Incremental decoder for the unframed stream
#[derive(Debug)]
pub struct LegacyDecoder {
    buffer: BytesMut,
    phase: Phase,
    /// Set when the last fed chunk ended with the stop marker
    tail_is_stop: bool,
    /// Headers carry a trailing `;`
    terminated: bool,
}

impl Default for LegacyDecoder {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            phase: Phase::AwaitingHeader,
            tail_is_stop: false,
            terminated: false,
        }
    }
}

impl LegacyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder for headers that end with one `;`
    pub fn terminated() -> Self {
        Self {
            terminated: true,
            ..Self::default()
        }
    }

    /// Append one read from the socket
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        self.tail_is_stop = data.ends_with(STOP_SENTINEL);
    }

    /// Pop the next message, if any
    pub fn next_message(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        match self.phase {
            Phase::AwaitingHeader => self.take_header(),
            Phase::Streaming => Ok(self.take_audio()),
        }
    }

    fn take_audio(&mut self) -> Option<WireMessage> {
        if self.tail_is_stop && self.buffer.len() >= STOP_SENTINEL.len() {
            let audio_len = self.buffer.len() - STOP_SENTINEL.len();
            if audio_len > 0 {
                return Some(WireMessage::Audio(self.buffer.split_to(audio_len).freeze()));
            }
            self.buffer.clear();
            self.tail_is_stop = false;
            // a new header follows a restart
            self.phase = Phase::AwaitingHeader;
            return Some(WireMessage::Stop);
        }
        if self.buffer.is_empty() {
            return None;
        }
        Some(WireMessage::Audio(self.buffer.split().freeze()))
    }

    fn take_header(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        // a stop with no stream running
        if self.buffer.starts_with(STOP_SENTINEL) {
            let _ = self.buffer.split_to(STOP_SENTINEL.len());
            if self.buffer.is_empty() {
                self.tail_is_stop = false;
            }
            return Ok(Some(WireMessage::Stop));
        }
        if STOP_SENTINEL.starts_with(&self.buffer[..]) {
            return Ok(None);
        }

        let marker = HEADER_MARKER.as_bytes();
        let prefix_len = self.buffer.len().min(marker.len());
        if self.buffer[..prefix_len] != marker[..prefix_len] {
            return Err(ProtocolError::MissingMarker);
        }

        let Some(mut end) = header_end(&self.buffer)? else {
            if self.buffer.len() > MAX_HEADER_LEN {
                return Err(ProtocolError::FieldCount(count_fields(&self.buffer)));
            }
            return Ok(None);
        };
        if self.terminated {
            match self.buffer.get(end) {
                None => return Ok(None),
                Some(b) if *b == FIELD_SEPARATOR as u8 => end += 1,
                Some(b) => {
                    return Err(ProtocolError::InvalidField {
                        field: "header terminator",
                        value: format!("{:#04x}", b),
                    })
                }
            }
        }

        let header = self.buffer.split_to(end);
        let text = std::str::from_utf8(&header).map_err(|_| ProtocolError::NotUtf8)?;
        let format = AudioFormat::parse_settings_header(text)?;
        self.phase = Phase::Streaming;
        Ok(Some(WireMessage::Settings(format)))
    }
}

/// Locate the end of the header inside `buffer`, or `None` if more bytes
/// are needed to tell.
fn header_end(buffer: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let separator = FIELD_SEPARATOR as u8;
    let last_field_start = buffer
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == separator)
        .nth(HEADER_FIELDS - 2)
        .map(|(idx, _)| idx + 1);
    let Some(start) = last_field_start else {
        return Ok(None);
    };

    let rest = &buffer[start..];
    let mut pending = false;
    let mut matched: Option<usize> = None;
    for token in SAMPLE_TYPE_TOKENS {
        let token = token.as_bytes();
        if rest.starts_with(token) {
            matched = Some(matched.map_or(token.len(), |m| m.max(token.len())));
        } else if token.starts_with(rest) {
            pending = true;
        }
    }

    match (matched, pending) {
        (Some(len), _) => Ok(Some(start + len)),
        (None, true) => Ok(None),
        (None, false) => Err(ProtocolError::InvalidField {
            field: "sample type",
            value: String::from_utf8_lossy(&rest[..rest.len().min(16)]).into_owned(),
        }),
    }
}

fn count_fields(buffer: &[u8]) -> usize {
    buffer.iter().filter(|b| **b == FIELD_SEPARATOR as u8).count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::format::{ByteOrder, SampleType};

    fn drain(decoder: &mut LegacyDecoder) -> Vec<WireMessage> {
        let mut out = Vec::new();
        while let Some(message) = decoder.next_message().unwrap() {
            out.push(message);
        }
        out
    }

    #[test]
    fn test_header_then_audio_in_one_read() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"{{{44100;2;16;audio/pcm;LittleEndian;SignedInt\x01\x02\x03\x04");

        let messages = drain(&mut decoder);
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            WireMessage::Settings(format) => {
                assert_eq!(format.sample_rate, 44100);
                assert_eq!(format.byte_order, ByteOrder::Little);
                assert_eq!(format.sample_type, SampleType::SignedInt);
            }
            other => panic!("expected settings, got {:?}", other),
        }
        assert_eq!(messages[1], WireMessage::Audio(Bytes::from_static(&[1, 2, 3, 4])));
    }

    #[test]
    fn test_header_split_inside_ambiguous_token() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;Un");
        assert!(drain(&mut decoder).is_empty());

        decoder.feed(b"known");
        let messages = drain(&mut decoder);
        assert!(matches!(
            &messages[..],
            [WireMessage::Settings(f)] if f.sample_type == SampleType::Unknown
        ));
    }

    #[test]
    fn test_stop_marker_at_tail_resets_to_header() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;Float");
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::InvalidField { field: "format", .. })
        ));

        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;UnsignedInt");
        drain(&mut decoder);
        decoder.feed(b"\x10\x20stop!!!");
        assert_eq!(
            drain(&mut decoder),
            vec![
                WireMessage::Audio(Bytes::from_static(&[0x10, 0x20])),
                WireMessage::Stop,
            ]
        );

        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;SignedInt");
        assert!(matches!(
            &drain(&mut decoder)[..],
            [WireMessage::Settings(_)]
        ));
    }

    #[test]
    fn test_stop_without_header() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"sto");
        assert!(drain(&mut decoder).is_empty());
        decoder.feed(b"p!!!");
        assert_eq!(drain(&mut decoder), vec![WireMessage::Stop]);

        // repeated stops, then a fresh header
        decoder.feed(b"stop!!!stop!!!");
        assert_eq!(drain(&mut decoder), vec![WireMessage::Stop, WireMessage::Stop]);
        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;SignedInt");
        assert!(matches!(&drain(&mut decoder)[..], [WireMessage::Settings(_)]));
    }

    #[test]
    fn test_stop_after_stopped_stream() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"{{{8000;1;8;audio/pcm;BigEndian;SignedInt\x01\x02stop!!!");
        let messages = drain(&mut decoder);
        assert_eq!(
            &messages[1..],
            &[WireMessage::Audio(Bytes::from_static(&[1, 2])), WireMessage::Stop]
        );

        decoder.feed(b"stop!!!");
        assert_eq!(drain(&mut decoder), vec![WireMessage::Stop]);
    }

    #[test]
    fn test_terminated_header_keeps_audio_aligned() {
        let mut decoder = LegacyDecoder::terminated();
        decoder.feed(b"{{{8000;1;16;audio/pcm;LittleEndian;UnSignedInt");
        assert!(drain(&mut decoder).is_empty());

        decoder.feed(b";\x01\x02\x03\x04");
        let messages = drain(&mut decoder);
        assert!(matches!(
            &messages[0],
            WireMessage::Settings(f) if f.sample_type == SampleType::UnsignedInt
        ));
        assert_eq!(messages[1], WireMessage::Audio(Bytes::from_static(&[1, 2, 3, 4])));
    }

    #[test]
    fn test_terminated_header_requires_separator() {
        let mut decoder = LegacyDecoder::terminated();
        decoder.feed(b"{{{8000;1;16;audio/pcm;LittleEndian;Float\x01");
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::InvalidField { field: "header terminator", .. })
        ));
    }

    #[test]
    fn test_rejects_missing_marker() {
        let mut decoder = LegacyDecoder::new();
        decoder.feed(b"RIFF");
        assert_eq!(decoder.next_message(), Err(ProtocolError::MissingMarker));
    }
}
