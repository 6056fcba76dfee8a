//! Targets, their compact `bits` encoding, and the work a target represents.
//!
//! A [`Target`] is the 256-bit threshold a header hash must not exceed. Block
//! headers carry it in a lossy floating-point-like form: one exponent byte and a
//! three-byte mantissa whose top bit is a sign. Decoding follows the reference
//! network bit for bit, including its refusal of negative and oversized values.
use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign},
};

use bitcoin::{hashes::Hash, BlockHash};
use primitive_types::U256;

use crate::error::TargetError;

/// Sign bit of the compact mantissa.
const SIGN_BIT: u32 = 0x0080_0000;
/// Mantissa bits of the compact encoding.
const MANTISSA_MASK: u32 = 0x007f_ffff;

/// A 256-bit proof-of-work threshold.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Target(U256);

impl Target {
    /// The zero target (met by no hash except zero).
    pub const ZERO: Target = Target(U256::zero());

    /// Wrap a raw 256-bit value.
    pub const fn new(value: U256) -> Self {
        Target(value)
    }

    /// The underlying integer.
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// Parse a decimal string, as targets are usually quoted in fixtures and logs.
    pub fn from_dec_str(s: &str) -> Option<Self> {
        U256::from_dec_str(s).ok().map(Target)
    }

    /// Decode compact `bits`.
    ///
    /// A set sign bit on a non-zero result is [`TargetError::Negative`]; exponents
    /// that would push a non-zero mantissa past 256 bits are [`TargetError::Overflow`].
    /// Mantissa bytes shifted out below an exponent of 3 are dropped.
    pub fn from_compact(bits: u32) -> Result<Self, TargetError> {
        let exponent = bits >> 24;
        let mantissa = bits & MANTISSA_MASK;

        let small = if exponent <= 3 {
            Some(mantissa >> (8 * (3 - exponent)))
        } else {
            None
        };
        let non_zero = match small {
            Some(v) => v != 0,
            None => mantissa != 0,
        };

        if non_zero && bits & SIGN_BIT != 0 {
            return Err(TargetError::Negative { bits });
        }
        if non_zero
            && (exponent > 34
                || (exponent > 33 && mantissa > 0xff)
                || (exponent > 32 && mantissa > 0xffff))
        {
            return Err(TargetError::Overflow { bits });
        }

        let value = match small {
            Some(v) => U256::from(v),
            None if mantissa == 0 => U256::zero(),
            None => U256::from(mantissa) << (8 * (exponent as usize - 3)),
        };
        Ok(Target(value))
    }

    /// Canonical compact encoding: shortest exponent, mantissa sign bit clear.
    pub fn to_compact(&self) -> u32 {
        if self.0.is_zero() {
            return 0;
        }
        let mut size = (self.0.bits() as u32 + 7) / 8;
        let mut mantissa = if size <= 3 {
            self.0.low_u32() << (8 * (3 - size))
        } else {
            (self.0 >> (8 * (size as usize - 3))).low_u32()
        };
        if mantissa & SIGN_BIT != 0 {
            mantissa >>= 8;
            size += 1;
        }
        (size << 24) | (mantissa & 0x00ff_ffff)
    }

    /// Whether `hash`, read as a little-endian integer, is at or below this target.
    pub fn is_met_by(&self, hash: &BlockHash) -> bool {
        U256::from_little_endian(hash.as_byte_array()) <= self.0
    }

    /// Expected number of hashes to meet this target: `2^256 / (target + 1)`.
    pub fn to_work(&self) -> Work {
        if self.0.is_zero() {
            return Work(U256::MAX);
        }
        if self.0 == U256::MAX {
            return Work(U256::one());
        }
        // (2^256 - t - 1) / (t + 1) + 1 == 2^256 / (t + 1) without a 257-bit numerator.
        Work((!self.0 / (self.0 + U256::one())) + U256::one())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Accumulated proof of work.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Work(U256);

impl Work {
    /// No work.
    pub const ZERO: Work = Work(U256::zero());

    /// Wrap a raw 256-bit value.
    pub const fn new(value: U256) -> Self {
        Work(value)
    }

    /// The underlying integer.
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// Work of a header with the given compact bits; undecodable bits count as no work.
    pub fn from_bits(bits: u32) -> Self {
        Target::from_compact(bits)
            .map(|t| t.to_work())
            .unwrap_or(Work::ZERO)
    }
}

impl Add for Work {
    type Output = Work;

    fn add(self, rhs: Work) -> Work {
        Work(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Work {
    fn add_assign(&mut self, rhs: Work) {
        *self = *self + rhs;
    }
}

impl Sum for Work {
    fn sum<I: Iterator<Item = Work>>(iter: I) -> Work {
        iter.fold(Work::ZERO, Add::add)
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
