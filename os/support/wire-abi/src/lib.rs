//! # Wire encoding
//!
//! Fixed-size little-endian encoding for values that cross the user/kernel
//! boundary by value. Shared by the driver-call layer and the ABI crates
//! built on it, so neither side depends on the other.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

/// Fixed-size little-endian encoding for values passed by value through a
/// driver call.
pub trait Wire: Sized {
    /// Encoded size in bytes.
    const WIRE_SIZE: usize;

    /// Encode into `out`, which is exactly [`WIRE_SIZE`](Self::WIRE_SIZE) bytes long.
    fn write_to(&self, out: &mut [u8]);

    /// Decode from `bytes`; `None` if the length does not match.
    fn read_from(bytes: &[u8]) -> Option<Self>;

    fn to_wire(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::WIRE_SIZE];
        self.write_to(&mut out);
        out
    }
}

macro_rules! impl_wire_int {
    ($($ty:ty),* $(,)?) => {$(
        impl Wire for $ty {
            const WIRE_SIZE: usize = size_of::<$ty>();

            #[inline]
            fn write_to(&self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn read_from(bytes: &[u8]) -> Option<Self> {
                Some(Self::from_le_bytes(bytes.try_into().ok()?))
            }
        }
    )*};
}

impl_wire_int!(u8, u16, u32, u64, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x1122_3344u32.to_wire(), [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(u64::read_from(&[1, 0, 0, 0, 0, 0, 0, 0]), Some(1));
        assert_eq!(i64::read_from(&(-5i64).to_le_bytes()), Some(-5));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        assert_eq!(u32::read_from(&[1, 2, 3]), None);
        assert_eq!(u8::read_from(&[]), None);
    }
}
