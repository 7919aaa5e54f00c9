//! Architectural word width abstraction.
//!
//! The reference implementation templates `Memory`/`Registers`/`CPU` on an
//! integer width parameter `W` (4, 8, or 16 bytes). Rather than three
//! hand-duplicated modules or a runtime width check on the hot path, this
//! crate monomorphizes over a marker type per width, with arithmetic routed
//! through the [`Word`] trait so the executor's handlers are written once
//! and instantiated for `Rv32`, `Rv64`, and `Rv128`.

use core::fmt::Debug;
use core::ops::{Add, BitAnd, BitOr, BitXor, Not, Shl, Shr, Sub};

/// An XLEN-wide machine integer: the register/address representation for one
/// architectural width.
pub trait Word:
    Copy
    + Clone
    + Debug
    + Default
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + Add<Output = Self>
    + Sub<Output = Self>
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + Not<Output = Self>
    + Shl<u32, Output = Self>
    + Shr<u32, Output = Self>
{
    /// Size of this word in bytes (4, 8, or 16).
    const BYTES: usize;
    const ZERO: Self;
    const ONE: Self;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_neg(self) -> Self;

    /// Sign-extend a 64-bit signed value into this word width.
    fn from_i64(v: i64) -> Self;
    /// Zero-extend a u64 into this word width.
    fn from_u64(v: u64) -> Self;
    /// Truncating conversion to u64 (low 64 bits).
    fn as_u64(self) -> u64;
    /// Reinterpret as signed for comparisons/shifts.
    fn as_i64(self) -> i64;

    fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl Word for u32 {
    const BYTES: usize = 4;
    const ZERO: Self = 0;
    const ONE: Self = 1;
    fn wrapping_add(self, rhs: Self) -> Self {
        u32::wrapping_add(self, rhs)
    }
    fn wrapping_sub(self, rhs: Self) -> Self {
        u32::wrapping_sub(self, rhs)
    }
    fn wrapping_mul(self, rhs: Self) -> Self {
        u32::wrapping_mul(self, rhs)
    }
    fn wrapping_neg(self) -> Self {
        u32::wrapping_neg(self)
    }
    fn from_i64(v: i64) -> Self {
        v as i32 as u32
    }
    fn from_u64(v: u64) -> Self {
        v as u32
    }
    fn as_u64(self) -> u64 {
        self as u64
    }
    fn as_i64(self) -> i64 {
        self as i32 as i64
    }
}

impl Word for u64 {
    const BYTES: usize = 8;
    const ZERO: Self = 0;
    const ONE: Self = 1;
    fn wrapping_add(self, rhs: Self) -> Self {
        u64::wrapping_add(self, rhs)
    }
    fn wrapping_sub(self, rhs: Self) -> Self {
        u64::wrapping_sub(self, rhs)
    }
    fn wrapping_mul(self, rhs: Self) -> Self {
        u64::wrapping_mul(self, rhs)
    }
    fn wrapping_neg(self) -> Self {
        u64::wrapping_neg(self)
    }
    fn from_i64(v: i64) -> Self {
        v as u64
    }
    fn from_u64(v: u64) -> Self {
        v
    }
    fn as_u64(self) -> u64 {
        self
    }
    fn as_i64(self) -> i64 {
        self as i64
    }
}

impl Word for u128 {
    const BYTES: usize = 16;
    const ZERO: Self = 0;
    const ONE: Self = 1;
    fn wrapping_add(self, rhs: Self) -> Self {
        u128::wrapping_add(self, rhs)
    }
    fn wrapping_sub(self, rhs: Self) -> Self {
        u128::wrapping_sub(self, rhs)
    }
    fn wrapping_mul(self, rhs: Self) -> Self {
        u128::wrapping_mul(self, rhs)
    }
    fn wrapping_neg(self) -> Self {
        u128::wrapping_neg(self)
    }
    fn from_i64(v: i64) -> Self {
        v as i128 as u128
    }
    fn from_u64(v: u64) -> Self {
        v as u128
    }
    fn as_u64(self) -> u64 {
        self as u64
    }
    fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Marker for RV32 (XLEN=32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rv32;
/// Marker for RV64 (XLEN=64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rv64;
/// Marker for RV128 (XLEN=128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rv128;

/// A width tag binding a marker type to its register representation and
/// the compressed-extension instruction divisor.
pub trait Xlen: Copy + Clone + Debug + Default + 'static {
    type Reg: Word;
    /// `pc / DIVISOR` indexes the decoder cache; 2 with the compressed
    /// extension enabled, 4 otherwise. rvcore always builds with `C`
    /// support, so this is always 2.
    const DIVISOR: u64 = 2;
    const NAME: &'static str;
}

impl Xlen for Rv32 {
    type Reg = u32;
    const NAME: &'static str = "rv32";
}
impl Xlen for Rv64 {
    type Reg = u64;
    const NAME: &'static str = "rv64";
}
impl Xlen for Rv128 {
    type Reg = u128;
    const NAME: &'static str = "rv128";
}
