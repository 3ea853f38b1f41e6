//! Raw readout decoding
//!
//! Triggered acquisitions answer with a raw byte stream of
//! `8 * sample_count` bytes: each complex sample is a little-endian f32
//! real part followed by a little-endian f32 imaginary part.

use bytes::Buf;
use num_complex::Complex;

use crate::error::{ConsoleError, Result};

/// Bytes occupied by one complex sample on the wire
pub const BYTES_PER_SAMPLE: usize = 8;

/// Wire length in bytes of a readout with the given sample count
pub fn readout_len(sample_count: usize) -> usize {
    sample_count * BYTES_PER_SAMPLE
}

/// Decode a raw readout byte stream into complex samples
///
/// # Errors
///
/// - [`ConsoleError::InvalidFrame`] - Stream length is not a whole number
///   of samples
pub fn decode_readout(mut data: &[u8]) -> Result<Vec<Complex<f32>>> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(ConsoleError::InvalidFrame {
            expected: data.len() - data.len() % BYTES_PER_SAMPLE + BYTES_PER_SAMPLE,
            actual: data.len(),
        });
    }
    let mut samples = Vec::with_capacity(data.len() / BYTES_PER_SAMPLE);
    while data.has_remaining() {
        let re = data.get_f32_le();
        let im = data.get_f32_le();
        samples.push(Complex::new(re, im));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readout_len() {
        assert_eq!(readout_len(50_000), 400_000);
        assert_eq!(readout_len(0), 0);
    }

    #[test]
    fn test_decode_single_sample() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(&(-0.25f32).to_le_bytes());
        let samples = decode_readout(&data).unwrap();
        assert_eq!(samples, vec![Complex::new(1.5, -0.25)]);
    }

    #[test]
    fn test_decode_preserves_order() {
        let mut data = Vec::new();
        for i in 0..4 {
            data.extend_from_slice(&(i as f32).to_le_bytes());
            data.extend_from_slice(&(-(i as f32)).to_le_bytes());
        }
        let samples = decode_readout(&data).unwrap();
        assert_eq!(samples.len(), 4);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.re, i as f32);
            assert_eq!(sample.im, -(i as f32));
        }
    }

    #[test]
    fn test_decode_empty() {
        assert_eq!(decode_readout(&[]).unwrap(), Vec::new());
    }

    #[test]
    fn test_decode_rejects_ragged_length() {
        let data = vec![0u8; 13];
        let result = decode_readout(&data);
        assert!(matches!(
            result,
            Err(ConsoleError::InvalidFrame {
                expected: 16,
                actual: 13
            })
        ));
    }
}
