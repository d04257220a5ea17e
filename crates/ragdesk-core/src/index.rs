//! Flat exact nearest-neighbor index over L2 distance.
//!
//! Vectors are stored row-major in one contiguous buffer; the row number is the
//! entry's identity. The dimension is fixed by the first non-empty insertion.

use std::cmp::Ordering;

use bincode::config::standard as bincode_config;
use bincode::{decode_from_slice, encode_to_vec, Decode, Encode};

/// Bumped whenever the on-disk layout changes.
pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatIndex {
    dimension: Option<usize>,
    data: Vec<f32>,
}

/// Encoded with bincode ahead of the vectors, which follow as little-endian f32s.
/// The payload size is derived from the header and checked against the input
/// before anything is allocated.
#[derive(Encode, Decode)]
struct IndexHeader {
    version: u32,
    dimension: Option<usize>,
    count: usize,
}

const F32_BYTES: usize = std::mem::size_of::<f32>();

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimension of stored vectors, or `None` before the first insertion.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        match self.dimension {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row at `offset`, if it exists.
    pub fn vector(&self, offset: usize) -> Option<&[f32]> {
        let d = self.dimension?;
        self.data.get(offset * d..(offset + 1) * d)
    }

    /// Appends a batch. Every row is checked before anything is written, so a
    /// rejected batch leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        self.dimension = Some(expected);
        self.data.reserve(vectors.len() * expected);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// The `k` nearest rows to `query` as `(offset, distance)`, closest first.
    /// Equal distances keep insertion order. `k` is capped at `len()`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        let Some(d) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != d {
            return Err(IndexError::DimensionMismatch {
                expected: d,
                actual: query.len(),
            });
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(d)
            .enumerate()
            .map(|(offset, row)| (offset, squared_l2(query, row)))
            .collect();

        let by_distance = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
        };
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored
            .into_iter()
            .map(|(offset, d2)| (offset, d2.sqrt()))
            .collect())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        let header = IndexHeader {
            version: INDEX_FORMAT_VERSION,
            dimension: self.dimension,
            count: self.len(),
        };
        let mut bytes = encode_to_vec(&header, bincode_config()).map_err(|e| IndexError::Encode(e.to_string()))?;
        bytes.reserve(self.data.len() * F32_BYTES);
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let (header, read): (IndexHeader, usize) =
            decode_from_slice(bytes, bincode_config()).map_err(|e| IndexError::Decode(e.to_string()))?;
        if header.version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(header.version));
        }

        let payload = &bytes[read..];
        let expected = match header.dimension {
            Some(0) => None,
            Some(d) => header.count.checked_mul(d).and_then(|n| n.checked_mul(F32_BYTES)),
            None if header.count == 0 => Some(0),
            None => None,
        };
        if expected != Some(payload.len()) {
            return Err(IndexError::Decode(format!(
                "header says {} entries of dimension {:?} but {} payload bytes follow",
                header.count,
                header.dimension,
                payload.len()
            )));
        }

        let data = payload
            .chunks_exact(F32_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self {
            dimension: header.dimension,
            data,
        })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vectors must have at least one dimension")]
    ZeroDimension,
    #[error("failed to encode index: {0}")]
    Encode(String),
    #[error("failed to decode index: {0}")]
    Decode(String),
    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),
}
