//! Record encoding for the KV backend: bincode (serde) then optional zstd.

use bincode::config::standard;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use zstd::{decode_all, encode_all};

use crate::IndexError;

/// Compression codec options for stored records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum CompressionCodec {
    /// Store the bincode bytes as-is.
    None,
    /// Zstd compression (default).
    #[default]
    Zstd,
}

/// Compression behavior configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressionConfig {
    pub codec: CompressionCodec,
    /// Zstd level, 1-22.
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: 3,
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(data),
            CompressionCodec::Zstd => Ok(encode_all(data.as_slice(), self.level)?),
        }
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<std::borrow::Cow<'a, [u8]>, IndexError> {
        match self.codec {
            CompressionCodec::None => Ok(std::borrow::Cow::Borrowed(data)),
            CompressionCodec::Zstd => Ok(std::borrow::Cow::Owned(decode_all(data)?)),
        }
    }

    /// Serialize and compress a record.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, IndexError> {
        let raw = encode_to_vec(value, standard())?;
        self.compress(raw)
    }

    /// Decompress and deserialize a record.
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, IndexError> {
        let raw = self.decompress(data)?;
        let (value, _) = decode_from_slice(&raw, standard())?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        vector: Vec<f32>,
    }

    #[test]
    fn zstd_and_plain_decode_what_they_encode() {
        let sample = Sample {
            id: "clip-1".into(),
            vector: vec![0.25; 64],
        };
        for codec in [CompressionCodec::None, CompressionCodec::Zstd] {
            let cfg = CompressionConfig::default().with_codec(codec);
            let bytes = cfg.encode(&sample).unwrap();
            let back: Sample = cfg.decode(&bytes).unwrap();
            assert_eq!(back, sample);
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let cfg = CompressionConfig::default();
        let err = cfg.decode::<Sample>(b"not zstd").unwrap_err();
        assert!(matches!(err, IndexError::Zstd(_)));
    }
}
