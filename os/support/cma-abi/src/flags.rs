use crate::limits::{CACHE_LINE_SIZE, MAX_ALIGN_LOG2, MAX_SPACES, PAGE_SIZE};
use bitfield_struct::bitfield;
use kernel_memory_addresses::Alignment;

/// Allocation flags passed from user space.
///
/// ```text
///  31      24 23      16 15  11 10 9 8 7  4 3 2 1 0
/// +----------+----------+------+--+-+-+----+-+-+-+-+
/// | chunk+1  | align    | rsvd |BN|P|C|rsvd|A|Z|S|C|
/// |          | log2     |      |  | | |    | | | | |
/// +----------+----------+------+--+-+-+----+-+-+-+-+
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MemoryFlags {
    /// Physically contiguous (bit 0). All allocations are; kept for ABI.
    pub contiguous: bool,
    /// Never swapped out (bit 1). All allocations are; kept for ABI.
    pub non_swappable: bool,
    /// Zero-fill the allocation before returning it (bit 2).
    pub zero: bool,
    /// One of the alignment selectors below is valid (bit 3).
    pub align: bool,
    #[bits(4)]
    __reserved_low: u8,
    /// Align to [`CACHE_LINE_SIZE`] (bit 8).
    pub align_cacheline: bool,
    /// Align to [`PAGE_SIZE`] (bit 9).
    pub align_page: bool,
    /// Align to `1 << align_log2` (bit 10).
    pub align_byte_n: bool,
    #[bits(5)]
    __reserved_mid: u8,
    /// Exponent for [`align_byte_n`](Self::align_byte_n) (bits 16..23).
    pub align_log2: u8,
    /// Chunk id plus one; zero means "any chunk" (bits 24..31).
    pub chunk: u8,
}

impl MemoryFlags {
    /// Requested alignment; `Ok(None)` if no selector is set.
    ///
    /// Selectors are checked in order page, cache line, byte-N.
    ///
    /// # Errors
    /// The byte-N exponent if it exceeds [`MAX_ALIGN_LOG2`].
    #[allow(clippy::cast_lossless)]
    pub const fn requested_alignment(self) -> Result<Option<Alignment>, u8> {
        if !self.align() {
            return Ok(None);
        }
        if self.align_page() {
            Ok(Alignment::new(PAGE_SIZE))
        } else if self.align_cacheline() {
            Ok(Alignment::new(CACHE_LINE_SIZE))
        } else if !self.align_byte_n() {
            Ok(None)
        } else if self.align_log2() > MAX_ALIGN_LOG2 {
            Err(self.align_log2())
        } else {
            Ok(Alignment::from_log2(self.align_log2() as u32))
        }
    }

    /// Target chunk, `None` for "any".
    #[must_use]
    pub const fn chunk_id(self) -> Option<u8> {
        match self.chunk() {
            0 => None,
            c => Some(c - 1),
        }
    }

    /// Select chunk `id`. Ids beyond the supported spaces are stored as "any".
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn with_chunk_id(self, id: u8) -> Self {
        if (id as usize) < MAX_SPACES {
            self.with_chunk(id + 1)
        } else {
            self.with_chunk(0)
        }
    }

    #[must_use]
    pub const fn with_page_alignment(self) -> Self {
        self.with_align(true).with_align_page(true)
    }

    #[must_use]
    pub const fn with_cacheline_alignment(self) -> Self {
        self.with_align(true).with_align_cacheline(true)
    }

    /// Align to `1 << log2` bytes.
    #[must_use]
    pub const fn with_byte_alignment(self, log2: u8) -> Self {
        self.with_align(true).with_align_byte_n(true).with_align_log2(log2)
    }
}
