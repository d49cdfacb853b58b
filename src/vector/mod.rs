//! Vector codec and similarity math.
//!
//! Embedding vectors are persisted as little-endian IEEE-754 bytes, four
//! bytes per element. Older archives used eight-byte elements; [`decode`]
//! accepts both, deciding by the deterministic rule in [`detect_format`].
//! The detection rule is part of the on-disk contract.
//!
//! All hot-path math is f32; scores widen to f64 only at the API boundary.

mod simd;


pub use simd::dot;

use thiserror::Error;

use crate::constants::{
    COMMON_EMBEDDING_DIMS, LEGACY_VECTOR_ELEMENT_BYTES, VECTOR_ELEMENT_BYTES,
};

/// On-disk element width of an embedding blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    /// Current format: 32-bit little-endian elements.
    F32,
    /// Legacy format: 64-bit little-endian elements.
    F64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Errors returned by the vector codec.
pub enum CodecError {
    /// Blob length is zero or not a multiple of four.
    #[error("invalid embedding blob length {len}: must be a positive multiple of 4")]
    InvalidLength {
        /// Offending byte length.
        len: usize,
    },
}

/// Serializes a vector as little-endian f32 bytes, `4 × len` bytes total.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * VECTOR_ELEMENT_BYTES);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decides whether a blob holds f32 or legacy f64 elements.
///
/// Rule, in order:
/// 1. Length not divisible by 8 → f32 (f64 blobs are always 8-aligned).
/// 2. Exactly one of `len/4`, `len/8` is a common embedding dimension →
///    that format.
/// 3. Both common → inspect the first `min(16, len/8)` values as f64: all
///    finite, none above 10 in magnitude, and at least half with magnitude
///    in `(0.001, 5)` → f64; otherwise f32.
/// 4. Neither common → f32 (the current format).
///
/// Deterministic by construction; real embedding values fall well outside
/// the narrow ambiguous region.
pub fn detect_format(bytes: &[u8]) -> VectorFormat {
    let len = bytes.len();
    if !len.is_multiple_of(LEGACY_VECTOR_ELEMENT_BYTES) {
        return VectorFormat::F32;
    }

    let n32 = len / VECTOR_ELEMENT_BYTES;
    let n64 = len / LEGACY_VECTOR_ELEMENT_BYTES;
    let common32 = COMMON_EMBEDDING_DIMS.contains(&n32);
    let common64 = COMMON_EMBEDDING_DIMS.contains(&n64);

    match (common32, common64) {
        (true, false) => VectorFormat::F32,
        (false, true) => VectorFormat::F64,
        (false, false) => VectorFormat::F32,
        (true, true) => {
            if f64_values_plausible(bytes, n64.min(16)) {
                VectorFormat::F64
            } else {
                VectorFormat::F32
            }
        }
    }
}

/// Sanity-checks the first `count` f64 values of an ambiguous blob.
fn f64_values_plausible(bytes: &[u8], count: usize) -> bool {
    let mut in_typical_range = 0usize;
    for i in 0..count {
        let start = i * LEGACY_VECTOR_ELEMENT_BYTES;
        let raw: [u8; 8] = bytes[start..start + LEGACY_VECTOR_ELEMENT_BYTES]
            .try_into()
            .unwrap();
        let v = f64::from_le_bytes(raw);
        if !v.is_finite() || v.abs() > 10.0 {
            return false;
        }
        let mag = v.abs();
        if mag > 0.001 && mag < 5.0 {
            in_typical_range += 1;
        }
    }
    in_typical_range * 2 >= count
}

/// Deserializes an embedding blob to f32, accepting both on-disk formats.
///
/// # Errors
///
/// [`CodecError::InvalidLength`] when the blob is empty or its length is
/// not a multiple of four.
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    let len = bytes.len();
    if len == 0 || !len.is_multiple_of(VECTOR_ELEMENT_BYTES) {
        return Err(CodecError::InvalidLength { len });
    }

    match detect_format(bytes) {
        VectorFormat::F32 => Ok(bytes
            .chunks_exact(VECTOR_ELEMENT_BYTES)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()),
        VectorFormat::F64 => Ok(bytes
            .chunks_exact(LEGACY_VECTOR_ELEMENT_BYTES)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()) as f32)
            .collect()),
    }
}

/// L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Inverse L2 norm, with `0.0` flagging an all-zero vector.
///
/// The hot index stores inverse norms so the scoring loop multiplies
/// instead of dividing; a zero marks the entry skipped during search.
pub fn inv_norm(v: &[f32]) -> f32 {
    let norm = l2_norm(v);
    if norm == 0.0 { 0.0 } else { 1.0 / norm }
}

/// Cosine similarity, widened to f64 at the boundary.
///
/// Returns `0.0` when either vector has zero norm or the dimensions differ.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let inv_a = inv_norm(a);
    let inv_b = inv_norm(b);
    if inv_a == 0.0 || inv_b == 0.0 {
        return 0.0;
    }
    f64::from(dot(a, b) * inv_a * inv_b)
}
