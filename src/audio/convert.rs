//! Conversion between `f32` samples and the byte layout of an `AudioFormat`

use crate::error::AudioError;
use crate::protocol::{AudioFormat, ByteOrder, SampleType};

/// Check that samples of this format can be converted at all
pub fn check_convertible(format: &AudioFormat) -> Result<(), AudioError> {
    format.validate().map_err(AudioError::UnsupportedFormat)?;
    if format.sample_type == SampleType::Unknown {
        return Err(AudioError::UnsupportedFormat(
            "sample type is Unknown".to_string(),
        ));
    }
    Ok(())
}

/// Encode interleaved `f32` samples into `format`'s byte layout
pub fn encode_samples(samples: &[f32], format: &AudioFormat) -> Result<Vec<u8>, AudioError> {
    check_convertible(format)?;
    let width = format.bytes_per_sample();
    let mut out = Vec::with_capacity(samples.len() * width);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0) as f64;
        match format.sample_type {
            SampleType::Float if width == 4 => {
                push_bytes(&mut out, &(s as f32).to_bits().to_le_bytes(), format.byte_order)
            }
            SampleType::Float => {
                push_bytes(&mut out, &s.to_bits().to_le_bytes(), format.byte_order)
            }
            SampleType::SignedInt => {
                let max = signed_max(format.sample_size_bits);
                let value = (s * max).round() as i64;
                push_bytes(&mut out, &value.to_le_bytes()[..width], format.byte_order);
            }
            SampleType::UnsignedInt => {
                let max = unsigned_max(format.sample_size_bits);
                let value = ((s + 1.0) / 2.0 * max).round() as u64;
                push_bytes(&mut out, &value.to_le_bytes()[..width], format.byte_order);
            }
            SampleType::Unknown => unreachable!("rejected by check_convertible"),
        }
    }
    Ok(out)
}

/// Decode bytes in `format`'s layout into interleaved `f32` samples.
///
/// A trailing partial sample is ignored.
pub fn decode_samples(data: &[u8], format: &AudioFormat) -> Result<Vec<f32>, AudioError> {
    check_convertible(format)?;
    let width = format.bytes_per_sample();
    let bits = format.sample_size_bits as u32;
    let mut out = Vec::with_capacity(data.len() / width);
    for chunk in data.chunks_exact(width) {
        let raw = read_le(chunk, format.byte_order);
        let sample = match format.sample_type {
            SampleType::Float if width == 4 => f32::from_bits(raw as u32),
            SampleType::Float => f64::from_bits(raw) as f32,
            SampleType::SignedInt => {
                let shift = 64 - bits;
                let value = ((raw << shift) as i64) >> shift;
                (value as f64 / signed_max(format.sample_size_bits)) as f32
            }
            SampleType::UnsignedInt => {
                (raw as f64 / unsigned_max(format.sample_size_bits) * 2.0 - 1.0) as f32
            }
            SampleType::Unknown => unreachable!("rejected by check_convertible"),
        };
        out.push(sample.clamp(-1.0, 1.0));
    }
    Ok(out)
}

fn signed_max(bits: u16) -> f64 {
    ((1u128 << (bits - 1)) - 1) as f64
}

fn unsigned_max(bits: u16) -> f64 {
    ((1u128 << bits) - 1) as f64
}

fn push_bytes(out: &mut Vec<u8>, little_endian: &[u8], order: ByteOrder) {
    match order {
        ByteOrder::Little => out.extend_from_slice(little_endian),
        ByteOrder::Big => out.extend(little_endian.iter().rev()),
    }
}

fn read_le(chunk: &[u8], order: ByteOrder) -> u64 {
    let mut value = 0u64;
    match order {
        ByteOrder::Little => {
            for (i, b) in chunk.iter().enumerate() {
                value |= (*b as u64) << (8 * i);
            }
        }
        ByteOrder::Big => {
            for b in chunk {
                value = (value << 8) | *b as u64;
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(bits: u16, sample_type: SampleType, byte_order: ByteOrder) -> AudioFormat {
        AudioFormat {
            sample_size_bits: bits,
            sample_type,
            byte_order,
            ..AudioFormat::default()
        }
    }

    #[test]
    fn test_signed_16_little_endian_layout() {
        let fmt = format(16, SampleType::SignedInt, ByteOrder::Little);
        let bytes = encode_samples(&[1.0, -1.0, 0.0], &fmt).unwrap();
        assert_eq!(bytes, vec![0xff, 0x7f, 0x01, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_big_endian_reverses_bytes() {
        let fmt = format(16, SampleType::SignedInt, ByteOrder::Big);
        let bytes = encode_samples(&[1.0], &fmt).unwrap();
        assert_eq!(bytes, vec![0x7f, 0xff]);
    }

    #[test]
    fn test_unsigned_8_midpoint() {
        let fmt = format(8, SampleType::UnsignedInt, ByteOrder::Little);
        let bytes = encode_samples(&[-1.0, 0.0, 1.0], &fmt).unwrap();
        assert_eq!(bytes, vec![0x00, 0x80, 0xff]);
    }

    #[test]
    fn test_decode_matches_encode_within_quantization() {
        let input = [0.5f32, -0.25, 0.999, -0.999, 0.0];
        for (bits, kind) in [
            (8, SampleType::SignedInt),
            (16, SampleType::SignedInt),
            (24, SampleType::SignedInt),
            (32, SampleType::UnsignedInt),
            (32, SampleType::Float),
            (64, SampleType::Float),
        ] {
            for order in ByteOrder::ALL {
                let fmt = format(bits, kind, order);
                let decoded = decode_samples(&encode_samples(&input, &fmt).unwrap(), &fmt).unwrap();
                let tolerance = 2.0 / unsigned_max(bits) as f32 + f32::EPSILON;
                for (a, b) in input.iter().zip(decoded.iter()) {
                    assert!(
                        (a - b).abs() <= tolerance.max(1e-6),
                        "{}-bit {:?} {:?}: {} vs {}",
                        bits,
                        kind,
                        order,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let fmt = format(16, SampleType::Unknown, ByteOrder::Little);
        assert!(matches!(
            encode_samples(&[0.0], &fmt),
            Err(AudioError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_partial_sample_ignored() {
        let fmt = format(16, SampleType::SignedInt, ByteOrder::Little);
        assert_eq!(decode_samples(&[0, 0, 1], &fmt).unwrap().len(), 1);
    }
}
