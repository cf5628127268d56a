//! 32位序列号空间的模运算。
//! Modular arithmetic over the 32-bit sequence number space.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A sequence number that wraps modulo 2^32.
///
/// Ordering follows serial-number arithmetic: `a < b` when `b` lies in the
/// half of the space "ahead" of `a`. This is only meaningful for numbers less
/// than 2^31 apart, which always holds for the windows used by this crate.
///
/// 模 2^32 回绕的序列号。
///
/// 排序遵循序列号算术：当 `b` 位于 `a` 之前的半个空间内时 `a < b`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(pub u32);

impl SeqNum {
    /// Returns the raw value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Signed distance from `other` to `self` (`self - other`).
    ///
    /// 从 `other` 到 `self` 的有符号距离。
    pub fn distance_from(self, other: SeqNum) -> i32 {
        self.0.wrapping_sub(other.0) as i32
    }

    /// Returns `true` if `self` lies in the half-open range `[start, end)`.
    ///
    /// 如果 `self` 位于半开区间 `[start, end)` 内，则返回 `true`。
    pub fn in_range(self, start: SeqNum, end: SeqNum) -> bool {
        start <= self && self < end
    }
}

impl PartialOrd for SeqNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_from(*other).cmp(&0)
    }
}

impl Add<u32> for SeqNum {
    type Output = SeqNum;

    fn add(self, rhs: u32) -> SeqNum {
        SeqNum(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNum {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

/// The unsigned number of sequence positions from `rhs` forward to `self`.
impl Sub for SeqNum {
    type Output = u32;

    fn sub(self, rhs: SeqNum) -> u32 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl From<u32> for SeqNum {
    fn from(value: u32) -> Self {
        SeqNum(value)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
