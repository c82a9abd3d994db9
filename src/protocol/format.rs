//! Audio format description and the one-shot settings header
//!
//! The header is plain text introduced by `{{{` and made of six
//! `;`-separated fields. It carries no terminator, so the receiver relies
//! on the fixed field count to find where it ends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Marker that introduces the settings header
pub const HEADER_MARKER: &str = "{{{";

/// Separator between header fields
pub const FIELD_SEPARATOR: char = ';';

/// Number of fields in the settings header
pub const HEADER_FIELDS: usize = 6;

/// Sample sizes accepted for capture and playback
pub const SUPPORTED_SAMPLE_SIZES: [u16; 5] = [8, 16, 24, 32, 64];

/// Byte order of multi-byte samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const ALL: [ByteOrder; 2] = [ByteOrder::Little, ByteOrder::Big];

    pub fn as_str(&self) -> &'static str {
        match self {
            ByteOrder::Little => "LittleEndian",
            ByteOrder::Big => "BigEndian",
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByteOrder {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LittleEndian" => Ok(ByteOrder::Little),
            "BigEndian" => Ok(ByteOrder::Big),
            other => Err(ProtocolError::InvalidField {
                field: "byte order",
                value: other.to_string(),
            }),
        }
    }
}

/// Interpretation of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    SignedInt,
    UnsignedInt,
    Float,
    Unknown,
}

impl SampleType {
    pub const ALL: [SampleType; 4] = [
        SampleType::SignedInt,
        SampleType::UnsignedInt,
        SampleType::Float,
        SampleType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::SignedInt => "SignedInt",
            SampleType::UnsignedInt => "UnsignedInt",
            SampleType::Float => "Float",
            SampleType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SignedInt" => Ok(SampleType::SignedInt),
            // older senders spelled it with a capital S
            "UnsignedInt" | "UnSignedInt" => Ok(SampleType::UnsignedInt),
            "Float" => Ok(SampleType::Float),
            "Unknown" => Ok(SampleType::Unknown),
            other => Err(ProtocolError::InvalidField {
                field: "sample type",
                value: other.to_string(),
            }),
        }
    }
}

/// Audio format negotiated before streaming starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_size_bits: u16,
    pub codec: String,
    pub byte_order: ByteOrder,
    pub sample_type: SampleType,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::DEFAULT_SAMPLE_RATE,
            channel_count: crate::constants::DEFAULT_CHANNELS,
            sample_size_bits: 16,
            codec: crate::constants::DEFAULT_CODEC.to_string(),
            byte_order: ByteOrder::Little,
            sample_type: SampleType::SignedInt,
        }
    }
}

impl AudioFormat {
    /// Check that the format can be written into a header and streamed.
    ///
    /// `SampleType::Unknown` passes: it is a legal header value, but
    /// capture and playback refuse it separately.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channel_count == 0 || self.channel_count > 32 {
            return Err(format!("unsupported channel count {}", self.channel_count));
        }
        if !SUPPORTED_SAMPLE_SIZES.contains(&self.sample_size_bits) {
            return Err(format!("unsupported sample size {}", self.sample_size_bits));
        }
        if self.sample_type == SampleType::Float && !matches!(self.sample_size_bits, 32 | 64) {
            return Err(format!(
                "float samples must be 32 or 64 bits, got {}",
                self.sample_size_bits
            ));
        }
        if self.codec.is_empty() {
            return Err("codec must not be empty".into());
        }
        if self.codec.contains(FIELD_SEPARATOR) {
            return Err(format!("codec {:?} contains the field separator", self.codec));
        }
        Ok(())
    }

    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        (self.sample_size_bits as usize + 7) / 8
    }

    /// Bytes occupied by one sample across all channels
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channel_count as usize
    }

    /// Number of bytes needed for `usec` microseconds of audio
    pub fn bytes_for_duration(&self, usec: u64) -> usize {
        let frames = (self.sample_rate as u64 * usec) / 1_000_000;
        frames as usize * self.bytes_per_frame()
    }

    /// Playback duration in microseconds of `len` bytes
    pub fn duration_for_bytes(&self, len: usize) -> u64 {
        let frame = self.bytes_per_frame();
        if frame == 0 || self.sample_rate == 0 {
            return 0;
        }
        (len / frame) as u64 * 1_000_000 / self.sample_rate as u64
    }

    /// Render the settings header, e.g.
    /// `{{{44100;2;16;audio/pcm;LittleEndian;SignedInt`
    pub fn settings_header(&self) -> String {
        self.render_header(self.sample_type.as_str(), "")
    }

    /// Render the header as older senders wrote it, with the `UnSignedInt`
    /// spelling and a trailing separator:
    /// `{{{8000;1;8;audio/pcm;BigEndian;UnSignedInt;`
    pub fn compat_settings_header(&self) -> String {
        let kind = match self.sample_type {
            SampleType::UnsignedInt => "UnSignedInt",
            other => other.as_str(),
        };
        self.render_header(kind, ";")
    }

    fn render_header(&self, kind: &str, terminator: &str) -> String {
        format!(
            "{marker}{rate}{sep}{channels}{sep}{size}{sep}{codec}{sep}{order}{sep}{kind}{end}",
            marker = HEADER_MARKER,
            sep = FIELD_SEPARATOR,
            rate = self.sample_rate,
            channels = self.channel_count,
            size = self.sample_size_bits,
            codec = self.codec,
            order = self.byte_order,
            kind = kind,
            end = terminator,
        )
    }

    /// Parse a complete settings header.
    ///
    /// One trailing `;` is tolerated since older senders appended it.
    pub fn parse_settings_header(header: &str) -> Result<Self, ProtocolError> {
        let body = header
            .strip_prefix(HEADER_MARKER)
            .ok_or(ProtocolError::MissingMarker)?;
        let body = body.strip_suffix(FIELD_SEPARATOR).unwrap_or(body);

        let fields: Vec<&str> = body.split(FIELD_SEPARATOR).collect();
        if fields.len() != HEADER_FIELDS {
            return Err(ProtocolError::FieldCount(fields.len()));
        }

        let format = Self {
            sample_rate: parse_number(fields[0], "sample rate")?,
            channel_count: parse_number(fields[1], "channel count")?,
            sample_size_bits: parse_number(fields[2], "sample size")?,
            codec: fields[3].to_string(),
            byte_order: fields[4].parse()?,
            sample_type: fields[5].parse()?,
        };

        format.validate().map_err(|_| ProtocolError::InvalidField {
            field: "format",
            value: body.to_string(),
        })?;
        Ok(format)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit {} {} ({})",
            self.sample_rate,
            self.channel_count,
            self.sample_size_bits,
            self.sample_type,
            self.byte_order,
            self.codec
        )
    }
}

fn parse_number<T: FromStr>(value: &str, field: &'static str) -> Result<T, ProtocolError> {
    // reject signs and whitespace that FromStr would otherwise accept
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cd_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 44100,
            channel_count: 2,
            sample_size_bits: 16,
            codec: "audio/pcm".to_string(),
            byte_order: ByteOrder::Little,
            sample_type: SampleType::SignedInt,
        }
    }

    #[test]
    fn test_header_text() {
        assert_eq!(
            cd_format().settings_header(),
            "{{{44100;2;16;audio/pcm;LittleEndian;SignedInt"
        );
    }

    #[test]
    fn test_compat_header_matches_older_senders() {
        let format = AudioFormat {
            sample_rate: 8000,
            channel_count: 1,
            sample_size_bits: 8,
            codec: "audio/pcm".into(),
            byte_order: ByteOrder::Big,
            sample_type: SampleType::UnsignedInt,
        };
        assert_eq!(
            format.compat_settings_header(),
            "{{{8000;1;8;audio/pcm;BigEndian;UnSignedInt;"
        );
        assert_eq!(
            AudioFormat::parse_settings_header(&format.compat_settings_header()).unwrap(),
            format
        );
    }

    #[test]
    fn test_parse_accepts_trailing_separator_and_old_spelling() {
        let parsed =
            AudioFormat::parse_settings_header("{{{8000;1;8;audio/pcm;BigEndian;UnSignedInt;")
                .unwrap();
        assert_eq!(parsed.sample_rate, 8000);
        assert_eq!(parsed.byte_order, ByteOrder::Big);
        assert_eq!(parsed.sample_type, SampleType::UnsignedInt);
    }

    #[test]
    fn test_parse_rejects_malformed_headers() {
        assert_eq!(
            AudioFormat::parse_settings_header("44100;2;16;audio/pcm;LittleEndian;SignedInt"),
            Err(ProtocolError::MissingMarker)
        );
        assert_eq!(
            AudioFormat::parse_settings_header("{{{44100;2;16;audio/pcm;LittleEndian"),
            Err(ProtocolError::FieldCount(5))
        );
        assert!(matches!(
            AudioFormat::parse_settings_header("{{{-1;2;16;audio/pcm;LittleEndian;SignedInt"),
            Err(ProtocolError::InvalidField { field: "sample rate", .. })
        ));
        assert!(matches!(
            AudioFormat::parse_settings_header("{{{44100;2;16;audio/pcm;Middle;SignedInt"),
            Err(ProtocolError::InvalidField { field: "byte order", .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(cd_format().validate().is_ok());

        let mut bad = cd_format();
        bad.codec = "a;b".into();
        assert!(bad.validate().is_err());

        let mut bad = cd_format();
        bad.sample_type = SampleType::Float;
        assert!(bad.validate().is_err());

        let mut bad = cd_format();
        bad.sample_rate = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let format = cd_format();
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.bytes_for_duration(1_000_000), 176_400);
        assert_eq!(format.duration_for_bytes(176_400), 1_000_000);
    }

    fn arb_format() -> impl Strategy<Value = AudioFormat> {
        let int_format = (
            1u32..=384_000,
            1u16..=32,
            prop::sample::select(vec![8u16, 16, 24, 32, 64]),
            "[a-z][a-z0-9/.-]{0,15}",
            prop::sample::select(ByteOrder::ALL.to_vec()),
            prop::sample::select(vec![
                SampleType::SignedInt,
                SampleType::UnsignedInt,
                SampleType::Unknown,
            ]),
        );
        let float_format = (
            1u32..=384_000,
            1u16..=32,
            prop::sample::select(vec![32u16, 64]),
            "[a-z][a-z0-9/.-]{0,15}",
            prop::sample::select(ByteOrder::ALL.to_vec()),
            Just(SampleType::Float),
        );
        prop_oneof![int_format, float_format].prop_map(
            |(sample_rate, channel_count, sample_size_bits, codec, byte_order, sample_type)| {
                AudioFormat {
                    sample_rate,
                    channel_count,
                    sample_size_bits,
                    codec,
                    byte_order,
                    sample_type,
                }
            },
        )
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(format in arb_format()) {
            let header = format.settings_header();
            prop_assert!(header.starts_with(HEADER_MARKER));
            prop_assert_eq!(AudioFormat::parse_settings_header(&header).unwrap(), format);
        }
    }
}
