//! Descriptor abstraction and the two stock adapters.
//!
//! The vocabulary and database are generic over [`Descriptor`], which is all
//! they need to know about a feature type: how to average a cluster, how far
//! two descriptors are from each other, and how to round-trip one through a
//! text form for persistence.
//!
//! Two adapters ship with the crate:
//!
//! - `[u8; N]` — binary descriptors (ORB, BRIEF, BRISK, ...). Distance is
//!   Hamming via XOR + popcount; the mean is a per-bit majority vote.
//! - `[f32; N]` — real-valued descriptors. Distance is L2; the mean is the
//!   componentwise arithmetic mean.

use bitvec::{order::Msb0, view::BitView};

use crate::error::{BowError, Result};

/// A fixed-size feature descriptor usable by the vocabulary tree.
pub trait Descriptor: Clone {
    /// Mean of a set of descriptors. An empty set yields the zero descriptor.
    fn mean_of(descriptors: &[&Self]) -> Self;

    /// Distance between two descriptors. Non-negative, symmetric, and zero
    /// for identical inputs.
    fn distance(a: &Self, b: &Self) -> f64;

    /// Text form used by the persisted vocabulary.
    fn to_text(&self) -> String;

    /// Parse the text form produced by [`to_text`](Descriptor::to_text).
    fn from_text(s: &str) -> Result<Self>;
}

/// 32-byte binary descriptor as produced by ORB or BRIEF.
pub type OrbDesc = [u8; 32];

/// 48-byte binary descriptor as produced by BRISK.
pub type BriskDesc = [u8; 48];

impl<const N: usize> Descriptor for [u8; N] {
    /// Per-bit majority vote. A bit is set iff strictly more than half of the
    /// set has it; ties resolve to 0.
    fn mean_of(descriptors: &[&Self]) -> Self {
        let mut result = [0u8; N];
        if descriptors.is_empty() {
            return result;
        }

        let half = descriptors.len() / 2;
        let mut counts = vec![0usize; N * 8];
        for d in descriptors {
            for (i, bit) in d.view_bits::<Msb0>().iter().enumerate() {
                if *bit {
                    counts[i] += 1;
                }
            }
        }

        let bits = result.view_bits_mut::<Msb0>();
        for (i, &c) in counts.iter().enumerate() {
            if c > half {
                bits.set(i, true);
            }
        }
        result
    }

    #[inline]
    fn distance(a: &Self, b: &Self) -> f64 {
        let mut ones = 0u32;
        for (x, y) in a.iter().zip(b) {
            ones += (x ^ y).count_ones();
        }
        f64::from(ones)
    }

    fn to_text(&self) -> String {
        let parts: Vec<String> = self.iter().map(|b| b.to_string()).collect();
        parts.join(" ")
    }

    fn from_text(s: &str) -> Result<Self> {
        let mut out = [0u8; N];
        let mut parts = s.split_whitespace();
        for slot in out.iter_mut() {
            let tok = parts
                .next()
                .ok_or_else(|| BowError::Serialization(format!("descriptor needs {N} bytes")))?;
            *slot = tok
                .parse()
                .map_err(|_| BowError::Serialization(format!("bad descriptor byte {tok:?}")))?;
        }
        Ok(out)
    }
}

impl<const N: usize> Descriptor for [f32; N] {
    fn mean_of(descriptors: &[&Self]) -> Self {
        let mut result = [0f32; N];
        if descriptors.is_empty() {
            return result;
        }

        for d in descriptors {
            for (slot, v) in result.iter_mut().zip(d.iter()) {
                *slot += v;
            }
        }
        let inv = 1.0 / descriptors.len() as f32;
        for slot in result.iter_mut() {
            *slot *= inv;
        }
        result
    }

    #[inline]
    fn distance(a: &Self, b: &Self) -> f64 {
        let sq: f64 = a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = f64::from(x - y);
                d * d
            })
            .sum();
        sq.sqrt()
    }

    fn to_text(&self) -> String {
        let parts: Vec<String> = self.iter().map(|v| v.to_string()).collect();
        parts.join(" ")
    }

    fn from_text(s: &str) -> Result<Self> {
        let mut out = [0f32; N];
        let mut parts = s.split_whitespace();
        for slot in out.iter_mut() {
            let tok = parts
                .next()
                .ok_or_else(|| BowError::Serialization(format!("descriptor needs {N} floats")))?;
            *slot = tok
                .parse()
                .map_err(|_| BowError::Serialization(format!("bad descriptor value {tok:?}")))?;
        }
        Ok(out)
    }
}
