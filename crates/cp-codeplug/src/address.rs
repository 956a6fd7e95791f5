//! Bit-precise address arithmetic
//!
//! Codeplug layouts are described down to single bits, so every position and
//! extent in this crate is measured in bits:
//!
//! - [`Address`]: absolute bit position. Bit 7 of a byte is its most
//!   significant bit and the byte-aligned position, i.e. the value of
//!   `byte:bit` is `8*byte + (7 - bit)`.
//! - [`Offset`]: signed bit delta.
//! - [`Size`]: non-negative bit delta.
//!
//! Operations that would leave the valid range return `None` instead of a
//! sentinel. [`CheckedOrd`] compares optional values the way the layout
//! algorithms need it: any comparison with an absent value is `false`.
//!
//! # Text form
//! ```text
//! hexbyte[h][:octalbit]
//! ```
//! A missing bit means bit 7 for addresses and bit 0 for offsets and sizes.
//!
//! ```rust
//! use cp_codeplug::{Address, Offset};
//!
//! let addr: Address = "10h:3".parse().unwrap();
//! assert_eq!(addr.byte(), 0x10);
//! assert_eq!(addr.bit(), 3);
//! assert_eq!((addr + Offset::from_bytes(1)).unwrap().to_string(), "11h:3");
//! ```

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};
use std::str::FromStr;

use crate::error::AddressError;

/// Absolute bit position within a memory image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

/// Signed distance between two addresses, in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(i64);

/// Non-negative extent, in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Size(u64);

impl Address {
    /// Address of bit 7 of byte 0
    pub const fn zero() -> Self {
        Address(0)
    }

    /// Byte-aligned address of the given byte.
    ///
    /// Overflows past byte `2^61 - 1`; use [`Address::try_from_byte`] for
    /// untrusted input.
    pub const fn from_byte(byte: u64) -> Self {
        Address(byte * 8)
    }

    pub fn try_from_byte(byte: u64) -> Option<Self> {
        byte.checked_mul(8).map(Address)
    }

    /// Address of `bit` within `byte`; `None` if `bit > 7` or out of range
    pub fn new(byte: u64, bit: u8) -> Option<Self> {
        if bit > 7 {
            return None;
        }
        byte.checked_mul(8)?.checked_add(u64::from(7 - bit)).map(Address)
    }

    /// Address from an absolute bit count
    pub const fn from_bits(bits: u64) -> Self {
        Address(bits)
    }

    /// Absolute bit count
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Index of the containing byte
    pub const fn byte(&self) -> u64 {
        self.0 / 8
    }

    /// Bit within the containing byte (7 = MSB)
    pub const fn bit(&self) -> u8 {
        7 - (self.0 % 8) as u8
    }

    pub const fn is_byte_aligned(&self) -> bool {
        self.0 % 8 == 0
    }

    /// Moves the address by `offset`; `None` on underflow/overflow
    pub fn checked_add(self, offset: Offset) -> Option<Address> {
        self.0.checked_add_signed(offset.0).map(Address)
    }

    /// Moves the address back by `offset`; `None` on underflow/overflow
    pub fn checked_sub(self, offset: Offset) -> Option<Address> {
        self.checked_add(Offset(offset.0.checked_neg()?))
    }
}

impl Offset {
    pub const fn zero() -> Self {
        Offset(0)
    }

    /// Offset of `n` whole bytes
    pub const fn from_bytes(n: i64) -> Self {
        Offset(n * 8)
    }

    /// Offset of `n` bytes and `bit` bits (`8n + bit`)
    pub fn from_byte_bit(n: i64, bit: u8) -> Option<Self> {
        if bit > 7 {
            return None;
        }
        n.checked_mul(8)?.checked_add(i64::from(bit)).map(Offset)
    }

    pub const fn from_bits(bits: i64) -> Self {
        Offset(bits)
    }

    pub const fn bits(&self) -> i64 {
        self.0
    }

    /// Whole bytes of the offset (truncated toward zero)
    pub const fn byte(&self) -> i64 {
        self.0 / 8
    }

    /// Remaining bits of the offset
    pub const fn bit(&self) -> u8 {
        (self.0.unsigned_abs() % 8) as u8
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub const fn is_byte_aligned(&self) -> bool {
        self.0 % 8 == 0
    }
}

impl Size {
    pub const fn zero() -> Self {
        Size(0)
    }

    pub const fn from_bytes(n: u64) -> Self {
        Size(n * 8)
    }

    pub fn try_from_bytes(n: u64) -> Option<Self> {
        n.checked_mul(8).map(Size)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Size(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Whole bytes covered (truncated)
    pub const fn byte(&self) -> u64 {
        self.0 / 8
    }

    pub const fn bit(&self) -> u8 {
        (self.0 % 8) as u8
    }

    /// Number of bytes needed to hold the size
    pub const fn byte_len(&self) -> u64 {
        self.0.div_ceil(8)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_byte_aligned(&self) -> bool {
        self.0 % 8 == 0
    }

    /// Truncating subtraction; `None` if `other` is larger
    pub fn checked_sub(self, other: Size) -> Option<Size> {
        self.0.checked_sub(other.0).map(Size)
    }

    pub fn as_offset(&self) -> Offset {
        Offset(i64::try_from(self.0).unwrap_or(i64::MAX))
    }
}

// Arithmetic
//
// Operators that cannot return `None` saturate at the ends of the range.

impl Add<Offset> for Address {
    type Output = Option<Address>;

    fn add(self, rhs: Offset) -> Option<Address> {
        self.checked_add(rhs)
    }
}

impl Sub<Offset> for Address {
    type Output = Option<Address>;

    fn sub(self, rhs: Offset) -> Option<Address> {
        self.checked_sub(rhs)
    }
}

impl Add<Size> for Address {
    type Output = Address;

    fn add(self, rhs: Size) -> Address {
        Address(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Size> for Address {
    fn add_assign(&mut self, rhs: Size) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Address {
    type Output = Offset;

    fn sub(self, rhs: Address) -> Offset {
        Offset(self.0.wrapping_sub(rhs.0) as i64)
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, rhs: Offset) -> Offset {
        Offset(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, rhs: Offset) -> Offset {
        Offset(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u32> for Offset {
    type Output = Offset;

    fn mul(self, rhs: u32) -> Offset {
        Offset(self.0.saturating_mul(i64::from(rhs)))
    }
}

impl Add for Size {
    type Output = Size;

    fn add(self, rhs: Size) -> Size {
        Size(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Size) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Mul<u32> for Size {
    type Output = Size;

    fn mul(self, rhs: u32) -> Size {
        Size(self.0.saturating_mul(u64::from(rhs)))
    }
}

impl TryFrom<Offset> for Size {
    type Error = Offset;

    fn try_from(offset: Offset) -> Result<Self, Self::Error> {
        u64::try_from(offset.0).map(Size).map_err(|_| offset)
    }
}

impl From<Size> for Offset {
    fn from(size: Size) -> Self {
        size.as_offset()
    }
}

/// Comparisons over optional values where an absent operand makes every
/// relation `false`
pub trait CheckedOrd {
    fn checked_lt(&self, other: &Self) -> bool;
    fn checked_le(&self, other: &Self) -> bool;
    fn checked_gt(&self, other: &Self) -> bool;
    fn checked_ge(&self, other: &Self) -> bool;
    fn checked_eq(&self, other: &Self) -> bool;
}

impl<T: Ord> CheckedOrd for Option<T> {
    fn checked_lt(&self, other: &Self) -> bool {
        matches!((self, other), (Some(a), Some(b)) if a < b)
    }

    fn checked_le(&self, other: &Self) -> bool {
        matches!((self, other), (Some(a), Some(b)) if a <= b)
    }

    fn checked_gt(&self, other: &Self) -> bool {
        matches!((self, other), (Some(a), Some(b)) if a > b)
    }

    fn checked_ge(&self, other: &Self) -> bool {
        matches!((self, other), (Some(a), Some(b)) if a >= b)
    }

    fn checked_eq(&self, other: &Self) -> bool {
        matches!((self, other), (Some(a), Some(b)) if a == b)
    }
}

// Text form

/// `8 * byte + bit`, rejecting values that leave the 64-bit range
fn byte_bit_to_bits(byte: u64, bit: u64, text: &str) -> Result<u64, AddressError> {
    byte.checked_mul(8)
        .and_then(|bits| bits.checked_add(bit))
        .ok_or_else(|| AddressError::InvalidByte(text.trim().to_string()))
}

/// Splits `[hex][h][:octal]` into its byte and optional bit count.
///
/// The byte part may be omitted when a bit part is given; the bit part may
/// have several octal digits (`:20` is 16 bits).
fn parse_byte_bit(s: &str) -> Result<(u64, Option<u64>), AddressError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(AddressError::Empty);
    }

    let (byte_part, bit_part) = match s.split_once(':') {
        Some((b, bit)) => (b, Some(bit)),
        None => (s, None),
    };

    let byte_digits = byte_part
        .strip_suffix('h')
        .or_else(|| byte_part.strip_suffix('H'))
        .unwrap_or(byte_part);
    let byte_digits = byte_digits
        .strip_prefix("0x")
        .or_else(|| byte_digits.strip_prefix("0X"))
        .unwrap_or(byte_digits);
    let byte = if byte_digits.is_empty() && bit_part.is_some() {
        0
    } else {
        u64::from_str_radix(byte_digits, 16)
            .map_err(|_| AddressError::InvalidByte(byte_part.to_string()))?
    };

    let bit = match bit_part {
        Some(bit) => Some(
            u64::from_str_radix(bit, 8).map_err(|_| AddressError::InvalidBit(bit.to_string()))?,
        ),
        None => None,
    };

    Ok((byte, bit))
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (byte, bit) = parse_byte_bit(s)?;
        let bit = bit.unwrap_or(7);
        let bit = u8::try_from(bit)
            .ok()
            .filter(|bit| *bit <= 7)
            .ok_or_else(|| AddressError::InvalidBit(format!("{:o}", bit)))?;
        byte_bit_to_bits(byte, u64::from(7 - bit), s).map(Address)
    }
}

impl FromStr for Offset {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (byte, bit) = parse_byte_bit(s)?;
        let bits = byte_bit_to_bits(byte, bit.unwrap_or(0), s)?;
        let bits = i64::try_from(bits).map_err(|_| AddressError::InvalidByte(s.to_string()))?;
        Ok(Offset(if negative { -bits } else { bits }))
    }
}

impl FromStr for Size {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (byte, bit) = parse_byte_bit(s)?;
        byte_bit_to_bits(byte, bit.unwrap_or(0), s).map(Size)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bit() == 7 {
            write!(f, "{:x}h", self.byte())
        } else {
            write!(f, "{:x}h:{}", self.byte(), self.bit())
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        if abs % 8 == 0 {
            write!(f, "{}{:x}h", sign, abs / 8)
        } else {
            write!(f, "{}{:x}h:{}", sign, abs / 8, abs % 8)
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bit() == 0 {
            write!(f, "{:x}h", self.byte())
        } else {
            write!(f, "{:x}h:{}", self.byte(), self.bit())
        }
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::{Address, Offset, Size};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    macro_rules! string_serde {
        ($ty:ty) => {
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(self)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let s = String::deserialize(deserializer)?;
                    s.parse().map_err(de::Error::custom)
                }
            }
        };
    }

    string_serde!(Address);
    string_serde!(Offset);
    string_serde!(Size);
}
