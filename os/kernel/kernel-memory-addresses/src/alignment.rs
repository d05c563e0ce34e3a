use core::fmt;

/// A power-of-two byte alignment.
///
/// Construction validates the value, so every method can rely on
/// `value & (value - 1) == 0` and `value != 0`.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Alignment(u64);

impl Alignment {
    /// Byte alignment.
    pub const BYTE: Self = Self(1);

    /// 64-byte cache line.
    pub const CACHE_LINE: Self = Self(64);

    /// 4 KiB page.
    pub const PAGE: Self = Self(4096);

    /// Validate `value` as a power of two.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Option<Self> {
        if value.is_power_of_two() {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Alignment of `1 << shift` bytes; `None` if the shift exceeds 63.
    #[inline]
    #[must_use]
    pub const fn from_log2(shift: u32) -> Option<Self> {
        match 1u64.checked_shl(shift) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline(always)]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline(always)]
    #[must_use]
    pub const fn log2(self) -> u32 {
        self.0.trailing_zeros()
    }

    /// Low-bit mask (`value - 1`).
    #[inline(always)]
    #[must_use]
    pub const fn mask(self) -> u64 {
        self.0 - 1
    }

    /// The stricter of the two alignments.
    #[inline]
    #[must_use]
    pub const fn max(self, other: Self) -> Self {
        if self.0 >= other.0 { self } else { other }
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, value: u64) -> bool {
        value & self.mask() == 0
    }

    #[inline]
    #[must_use]
    pub const fn align_down(self, value: u64) -> u64 {
        value & !self.mask()
    }

    /// Round `value` up to the next multiple; `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self, value: u64) -> Option<u64> {
        match value.checked_add(self.mask()) {
            Some(v) => Some(v & !self.mask()),
            None => None,
        }
    }
}

impl fmt::Debug for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alignment(0x{:X})", self.0)
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<Alignment> for u64 {
    #[inline]
    fn from(value: Alignment) -> Self {
        value.0
    }
}
