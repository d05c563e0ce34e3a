//! # Capacity limits and hardware granules

/// Number of independently configured address spaces ("chunks").
pub const MAX_SPACES: usize = 8;

/// Upper bound on chunk nodes per address space.
pub const MAX_CHUNK_NODES: usize = 0x8000;

/// Upper bound on address nodes per address space.
pub const MAX_ADDR_NODES: usize = (0x8000 - 2) / 2;

/// Alignment used for [`MemoryFlags::align_cacheline`](crate::MemoryFlags::align_cacheline).
pub const CACHE_LINE_SIZE: u64 = 64;

/// Alignment used for [`MemoryFlags::align_page`](crate::MemoryFlags::align_page).
pub const PAGE_SIZE: u64 = 4096;

/// Largest exponent accepted by [`MemoryFlags::align_log2`](crate::MemoryFlags::align_log2).
pub const MAX_ALIGN_LOG2: u8 = 63;

#[allow(clippy::cast_lossless)]
const _: () = {
    assert!(MAX_SPACES <= u8::BITS as usize, "device mask is a u8");
    assert!(MAX_SPACES < u8::MAX as usize, "chunk id + 1 must fit a u8");
    assert!(MAX_ADDR_NODES == 0x3FFF);
    assert!(CACHE_LINE_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(PAGE_SIZE.is_multiple_of(CACHE_LINE_SIZE));
};
