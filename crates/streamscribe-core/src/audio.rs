//! PCM sample conversion
//!
//! The recognizer accepts little-endian signed 16-bit PCM bytes and works
//! on float samples internally. Floats keep the int16 value range; the
//! feature extractor expects that scale.

use crate::{Error, Result};

/// Interpret `bytes` as little-endian signed 16-bit PCM and widen to f32.
///
/// The byte count must be even.
pub fn pcm_to_floats(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::invalid_input(format!(
            "PCM byte count must be even, got {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32)
        .collect())
}

/// Narrow float samples back to little-endian signed 16-bit PCM.
pub fn floats_to_pcm(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = sample.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}
