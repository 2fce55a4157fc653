//! Block headers: wire codec, proof-of-work target arithmetic, difficulty,
//! and the epoch retarget calculation.
//!
//! Targets are 256-bit integers; `U256` carries exactly the operations the
//! compact-bits conversions and the retarget formula need (shifts, multiply
//! and divide by small factors, long division for the difficulty ratio).

use serde::{Deserialize, Serialize};

use crate::codec::ByteReader;
use crate::constants::{LOWEST_BITS, TWO_WEEKS};
use crate::error::{Result, SpvError};
use crate::hashing::hash256;
use crate::types::Hash;

/// 256-bit unsigned integer as four little-endian u64 limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct U256([u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);

    pub fn from_u64(value: u64) -> Self {
        U256([value, 0, 0, 0])
    }

    pub fn from_be_bytes(bytes: &Hash) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let offset = 8 * (3 - i);
            let mut value = 0u64;
            for j in 0..8 {
                value = (value << 8) | bytes[offset + j] as u64;
            }
            *limb = value;
        }
        U256(limbs)
    }

    pub fn to_be_bytes(self) -> Hash {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            let offset = 8 * (3 - i);
            out[offset..offset + 8].copy_from_slice(&limb.to_be_bytes());
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&limb| limb == 0)
    }

    pub fn low_u64(&self) -> u64 {
        self.0[0]
    }

    /// Index of the highest set bit plus one; zero for zero.
    fn bit_length(&self) -> u32 {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return 64 * i as u32 + (64 - self.0[i].leading_zeros());
            }
        }
        0
    }

    fn bit(&self, index: u32) -> bool {
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    pub fn shl(self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut out = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                out.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    out.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        out
    }

    pub fn shr(self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut out = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in word_shift..4 {
            out.0[i - word_shift] |= self.0[i] >> bit_shift;
            if bit_shift > 0 && i - word_shift >= 1 {
                out.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
            }
        }
        out
    }

    pub fn checked_sub(self, other: U256) -> Option<U256> {
        let mut out = [0u64; 4];
        let mut borrow = false;
        for i in 0..4 {
            let (d1, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (d2, b2) = d1.overflowing_sub(borrow as u64);
            out[i] = d2;
            borrow = b1 || b2;
        }
        if borrow {
            None
        } else {
            Some(U256(out))
        }
    }

    /// Multiply by a u64 factor. Overflow past 256 bits is dropped; target
    /// arithmetic stays far below that.
    pub fn mul_u64(self, factor: u64) -> U256 {
        let mut out = [0u64; 4];
        let mut carry: u128 = 0;
        for i in 0..4 {
            let product = self.0[i] as u128 * factor as u128 + carry;
            out[i] = product as u64;
            carry = product >> 64;
        }
        U256(out)
    }

    pub fn div_u64(self, divisor: u64) -> U256 {
        if divisor == 0 {
            return U256::ZERO;
        }
        let mut out = [0u64; 4];
        let mut rem: u128 = 0;
        for i in (0..4).rev() {
            let cur = (rem << 64) | self.0[i] as u128;
            out[i] = (cur / divisor as u128) as u64;
            rem = cur % divisor as u128;
        }
        U256(out)
    }

    /// Long division; returns the quotient. Division by zero yields zero.
    pub fn div(self, divisor: U256) -> U256 {
        if divisor.is_zero() || self < divisor {
            return U256::ZERO;
        }
        let mut quotient = U256::ZERO;
        let mut remainder = U256::ZERO;
        let mut i = self.bit_length();
        while i > 0 {
            i -= 1;
            remainder = remainder.shl(1);
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if let Some(diff) = remainder.checked_sub(divisor) {
                remainder = diff;
                quotient.0[(i / 64) as usize] |= 1u64 << (i % 64);
            }
        }
        quotient
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// An 80-byte block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    /// Previous block hash in display order; reversed on the wire.
    pub prev_block: Hash,
    /// Merkle root in display order; reversed on the wire.
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: [u8; 4],
    pub nonce: [u8; 4],
}

impl BlockHeader {
    /// Parse exactly 80 bytes of header.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != 80 {
            return Err(SpvError::Malformed(format!(
                "block header must be 80 bytes, got {}",
                raw.len()
            )));
        }
        let mut reader = ByteReader::new(raw);
        let version = reader.read_u32_le()?;
        let mut prev_block = reader.read_array::<32>()?;
        prev_block.reverse();
        let mut merkle_root = reader.read_array::<32>()?;
        merkle_root.reverse();
        let timestamp = reader.read_u32_le()?;
        let bits = reader.read_array::<4>()?;
        let nonce = reader.read_array::<4>()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            timestamp,
            bits,
            nonce,
        })
    }

    pub fn serialize(&self) -> [u8; 80] {
        let mut out = [0u8; 80];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        let mut prev = self.prev_block;
        prev.reverse();
        out[4..36].copy_from_slice(&prev);
        let mut root = self.merkle_root;
        root.reverse();
        out[36..68].copy_from_slice(&root);
        out[68..72].copy_from_slice(&self.timestamp.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits);
        out[76..80].copy_from_slice(&self.nonce);
        out
    }

    /// Header hash in display order: reversed hash256 of the serialization.
    pub fn hash(&self) -> Hash {
        let mut digest = hash256(&self.serialize());
        digest.reverse();
        digest
    }

    pub fn id(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn target(&self) -> U256 {
        bits_to_target(&self.bits)
    }

    /// Ratio of the lowest-difficulty target to this header's target.
    pub fn difficulty(&self) -> u64 {
        let target = self.target();
        if target.is_zero() {
            return 0;
        }
        bits_to_target(&LOWEST_BITS).div(target).low_u64()
    }

    /// The header hash, read as a big-endian integer, must fall below the
    /// target.
    pub fn check_proof_of_work(&self) -> bool {
        U256::from_be_bytes(&self.hash()) < self.target()
    }

    /// BIP9 readiness: top three version bits are 001.
    pub fn bip9(&self) -> bool {
        self.version >> 29 == 0b001
    }

    /// BIP91 signalling: version bit 4.
    pub fn bip91(&self) -> bool {
        self.version >> 4 & 1 == 1
    }

    /// BIP141 (segwit) signalling: version bit 1.
    pub fn bip141(&self) -> bool {
        self.version >> 1 & 1 == 1
    }
}

/// Expand a compact 4-byte bits field into the full target:
/// `coefficient * 256^(exponent - 3)` with the exponent in the last byte
/// and the coefficient little-endian in the first three.
pub fn bits_to_target(bits: &[u8; 4]) -> U256 {
    let exponent = bits[3] as u32;
    let coefficient = u64::from(bits[0]) | u64::from(bits[1]) << 8 | u64::from(bits[2]) << 16;
    let base = U256::from_u64(coefficient);
    if exponent >= 3 {
        base.shl(8 * (exponent - 3))
    } else {
        base.shr(8 * (3 - exponent))
    }
}

/// Compress a target into compact form: exponent is the big-endian byte
/// length, coefficient the first three bytes.
pub fn target_to_bits(target: &U256) -> Result<[u8; 4]> {
    let be = target.to_be_bytes();
    let first = be
        .iter()
        .position(|&b| b != 0)
        .ok_or_else(|| SpvError::Malformed("zero target has no compact form".to_string()))?;
    let digits = &be[first..];
    let exponent = digits.len() as u8;
    let mut coefficient = [0u8; 3];
    for (i, slot) in coefficient.iter_mut().enumerate() {
        *slot = digits.get(i).copied().unwrap_or(0);
    }
    Ok([coefficient[2], coefficient[1], coefficient[0], exponent])
}

/// Retarget over one 2016-block epoch: scale the last target by the elapsed
/// time between the first and last headers, clamped to a factor of four
/// either way.
pub fn compute_new_target(first: &BlockHeader, last: &BlockHeader) -> U256 {
    let elapsed = last.timestamp as i64 - first.timestamp as i64;
    let clamped = elapsed.clamp(TWO_WEEKS as i64 / 4, TWO_WEEKS as i64 * 4) as u64;
    last.target().mul_u64(clamped).div_u64(TWO_WEEKS)
}

/// Compact form of [`compute_new_target`].
pub fn compute_new_bits(first: &BlockHeader, last: &BlockHeader) -> Result<[u8; 4]> {
    target_to_bits(&compute_new_target(first, last))
}
