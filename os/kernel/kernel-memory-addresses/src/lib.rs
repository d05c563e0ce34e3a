//! # Physical and Virtual Address Types
//!
//! Strongly typed wrappers for raw addresses handed around by the contiguous
//! memory manager, plus a validated power-of-two [`Alignment`].
//!
//! ## Overview
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | A bus/physical address as seen by DMA capable devices. |
//! | [`VirtualAddress`] | An address valid in the current (kernel or process) address space. |
//! | [`Alignment`] | A power-of-two byte alignment, checked on construction. |
//!
//! The wrappers are `#[repr(transparent)]` over `u64` and keep physical and
//! virtual addresses from being mixed up when translating between the two.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let align = Alignment::new(0x1000).unwrap();
//! let pa = PhysicalAddress::new(0x1000_0042);
//!
//! assert!(!pa.is_aligned(align));
//! assert_eq!(pa.align_down(align).as_u64(), 0x1000_0000);
//! assert_eq!(pa.align_up(align).unwrap().as_u64(), 0x1000_1000);
//! ```
//!
//! All arithmetic that can overflow has a `checked_*` variant returning
//! `Option`; the operator impls are reserved for callers that already proved
//! the range fits.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod alignment;
mod memory_address;
mod physical_address;
mod virtual_address;

pub use alignment::Alignment;
pub use memory_address::MemoryAddress;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rejects_non_powers_of_two() {
        assert!(Alignment::new(0).is_none());
        assert!(Alignment::new(3).is_none());
        assert!(Alignment::new(0x1800).is_none());
        assert_eq!(Alignment::new(1).map(Alignment::get), Some(1));
        assert_eq!(Alignment::new(0x1000).map(Alignment::log2), Some(12));
    }

    #[test]
    fn alignment_rounding() {
        let a = Alignment::new(0x40).unwrap();
        assert_eq!(a.align_up(0), Some(0));
        assert_eq!(a.align_up(1), Some(0x40));
        assert_eq!(a.align_up(0x40), Some(0x40));
        assert_eq!(a.align_up(u64::MAX), None);
        assert_eq!(a.align_down(0x7F), 0x40);
        assert!(a.is_aligned(0x80));
        assert!(!a.is_aligned(0x81));
    }

    #[test]
    fn alignment_max_picks_stricter() {
        let small = Alignment::new(8).unwrap();
        let page = Alignment::PAGE;
        assert_eq!(small.max(page), page);
        assert_eq!(page.max(small), page);
    }

    #[test]
    fn physical_offsets() {
        let base = PhysicalAddress::new(0x1000_0000);
        let addr = PhysicalAddress::new(0x1000_3000);
        assert_eq!(addr.offset_from(base), Some(0x3000));
        assert_eq!(base.offset_from(addr), None);
        assert_eq!(base.checked_add(0x10), Some(PhysicalAddress::new(0x1000_0010)));
        assert_eq!(PhysicalAddress::new(u64::MAX).checked_add(1), None);
    }

    #[test]
    fn virtual_pointer_round_trip() {
        let mut value = 0u32;
        let va = VirtualAddress::from_mut_ptr(&raw mut value);
        assert_eq!(va.as_mut_ptr::<u32>(), &raw mut value);
        assert!(!va.is_null());
        assert!(VirtualAddress::zero().is_null());
    }

    #[test]
    fn debug_formatting_distinguishes_spaces() {
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x1234)),
            "PA(0x0000000000001234)"
        );
        assert_eq!(
            format!("{:?}", VirtualAddress::new(0x1234)),
            "VA(0x0000000000001234)"
        );
        assert_eq!(format!("{}", PhysicalAddress::new(0xAB)), "0x00000000000000AB");
    }
}
