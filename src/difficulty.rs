//! Difficulty values decoded from compact "bits"
//!
//! Cumulative difficulty drives main-chain selection, so the float conversion
//! below follows the reference client's `GetDifficulty` step for step.

use crate::error::{ChainError, Result};
use crate::types::{BlockHeader, Hash};
use std::cmp::Ordering;

/// Difficulty as a double: `0xffff / mantissa`, rescaled by 256 per exponent
/// step away from 29.
pub fn difficulty_from_bits(bits: u32) -> f64 {
    let mantissa = bits & 0x00ff_ffff;
    if mantissa == 0 {
        return 0.0;
    }
    let mut shift = (bits >> 24) & 0xff;
    let mut diff = 0x0000_ffff as f64 / mantissa as f64;
    while shift < 29 {
        diff *= 256.0;
        shift += 1;
    }
    while shift > 29 {
        diff /= 256.0;
        shift -= 1;
    }
    diff
}

/// 256-bit integer for target comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct U256([u64; 4]); // little-endian words

impl U256 {
    fn zero() -> Self {
        U256([0; 4])
    }

    fn from_u32(value: u32) -> Self {
        U256([value as u64, 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }
        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    /// Interpret a hash in wire order as a little-endian number
    pub fn from_le_bytes(bytes: &Hash) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        U256(words)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

/// Expand a compact target: `mantissa * 256^(exponent - 3)`
///
/// Negative and overflowing encodings are rejected.
pub fn expand_target(bits: u32) -> Result<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa != 0 && bits & 0x0080_0000 != 0 {
        return Err(ChainError::MalformedData(format!(
            "negative target in bits 0x{:08x}",
            bits
        )));
    }
    if mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32))
    {
        return Err(ChainError::MalformedData(format!(
            "target overflow in bits 0x{:08x}",
            bits
        )));
    }

    if exponent <= 3 {
        Ok(U256::from_u32(mantissa >> (8 * (3 - exponent))))
    } else {
        Ok(U256::from_u32(mantissa).shl(8 * (exponent - 3)))
    }
}

/// Whether the header's hash is at or below the target its bits encode
pub fn check_proof_of_work(header: &BlockHeader) -> Result<bool> {
    let target = expand_target(header.bits)?;
    if target.is_zero() {
        return Ok(false);
    }
    Ok(U256::from_le_bytes(&header.hash()) <= target)
}
