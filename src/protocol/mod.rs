//! Wire protocol between sender and receiver
//!
//! A session on the wire is: one settings message, any number of audio
//! chunks, an optional stop marker, and possibly another settings message
//! when the sender restarts.

pub mod format;
pub mod frame;
pub mod legacy;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

pub use format::{AudioFormat, ByteOrder, SampleType};
pub use frame::FrameDecoder;
pub use legacy::LegacyDecoder;

/// Literal stop marker
pub const STOP_SENTINEL: &[u8] = b"stop!!!";

/// A decoded unit of the sender → receiver stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Settings(AudioFormat),
    Audio(Bytes),
    Stop,
}

/// How messages are delimited on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Length-prefixed frames
    #[default]
    Framed,
    /// Bare header, raw audio and a literal stop marker
    Legacy,
    /// As `Legacy`, with headers ending in `;` and spelling `UnSignedInt`
    #[serde(rename = "legacy-compat")]
    LegacyCompat,
}

impl Framing {
    pub fn encode(&self, message: &WireMessage) -> Bytes {
        match self {
            Framing::Framed => frame::encode_message(message),
            Framing::Legacy => legacy::encode_message(message),
            Framing::LegacyCompat => legacy::encode_compat_message(message),
        }
    }

    pub fn decoder(&self) -> StreamDecoder {
        match self {
            Framing::Framed => StreamDecoder::Framed(FrameDecoder::new()),
            Framing::Legacy => StreamDecoder::Legacy(LegacyDecoder::new()),
            Framing::LegacyCompat => StreamDecoder::Legacy(LegacyDecoder::terminated()),
        }
    }
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "framed" => Ok(Framing::Framed),
            "legacy" => Ok(Framing::Legacy),
            "legacy-compat" => Ok(Framing::LegacyCompat),
            other => Err(format!("unknown framing mode: {}", other)),
        }
    }
}

/// Decoder for either framing mode
#[derive(Debug)]
pub enum StreamDecoder {
    Framed(FrameDecoder),
    Legacy(LegacyDecoder),
}

impl StreamDecoder {
    pub fn feed(&mut self, data: &[u8]) {
        match self {
            StreamDecoder::Framed(d) => d.feed(data),
            StreamDecoder::Legacy(d) => d.feed(data),
        }
    }

    pub fn next_message(&mut self) -> Result<Option<WireMessage>, ProtocolError> {
        match self {
            StreamDecoder::Framed(d) => d.next_message(),
            StreamDecoder::Legacy(d) => d.next_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_encoding_is_bare() {
        let format = AudioFormat {
            sample_rate: 44100,
            channel_count: 2,
            sample_size_bits: 16,
            codec: "audio/pcm".into(),
            byte_order: ByteOrder::Little,
            sample_type: SampleType::SignedInt,
        };
        assert_eq!(
            Framing::Legacy.encode(&WireMessage::Settings(format)),
            Bytes::from_static(b"{{{44100;2;16;audio/pcm;LittleEndian;SignedInt")
        );
        assert_eq!(Framing::Legacy.encode(&WireMessage::Stop), Bytes::from_static(b"stop!!!"));
    }

    #[test]
    fn test_framing_from_str() {
        assert_eq!("Legacy".parse::<Framing>(), Ok(Framing::Legacy));
        assert_eq!("framed".parse::<Framing>(), Ok(Framing::Framed));
        assert_eq!("legacy-compat".parse::<Framing>(), Ok(Framing::LegacyCompat));
        assert!("raw".parse::<Framing>().is_err());
    }

    #[test]
    fn test_compat_stream_matches_older_senders() {
        let format = AudioFormat {
            sample_rate: 22050,
            channel_count: 1,
            sample_size_bits: 8,
            codec: "audio/pcm".into(),
            byte_order: ByteOrder::Little,
            sample_type: SampleType::UnsignedInt,
        };
        let mut wire = Vec::new();
        for message in [
            WireMessage::Settings(format.clone()),
            WireMessage::Audio(Bytes::from_static(&[0x80, 0x81])),
            WireMessage::Stop,
        ] {
            wire.extend_from_slice(&Framing::LegacyCompat.encode(&message));
        }
        assert_eq!(
            wire,
            b"{{{22050;1;8;audio/pcm;LittleEndian;UnSignedInt;\x80\x81stop!!!".to_vec()
        );

        let mut decoder = Framing::LegacyCompat.decoder();
        decoder.feed(&wire);
        assert_eq!(decoder.next_message(), Ok(Some(WireMessage::Settings(format))));
        assert_eq!(
            decoder.next_message(),
            Ok(Some(WireMessage::Audio(Bytes::from_static(&[0x80, 0x81]))))
        );
        assert_eq!(decoder.next_message(), Ok(Some(WireMessage::Stop)));
    }
}
