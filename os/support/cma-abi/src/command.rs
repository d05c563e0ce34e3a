use crate::limits::MAX_SPACES;

/// Function ids understood by the memory service.
///
/// The numbering is part of the ABI; gaps are commands a given build does
/// not implement.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryCommand {
    /// In/out: [`AllocRequest`](crate::AllocRequest).
    Alloc = 0,
    /// In: `u64` physical address.
    Free = 1,
    /// In: `u64` physical address. Out: `u64` allocation size.
    Size = 2,
    /// Cache maintenance for a buffer; architecture specific.
    Buffer = 3,
    /// Flush the whole data cache; architecture specific.
    Flush = 4,
    /// Clean a range; architecture specific.
    FlushSpecific = 5,
    /// Invalidate a range; architecture specific.
    InvalidateSpecific = 6,
    /// Clean and invalidate a range; architecture specific.
    FlushInvalidateSpecific = 7,
    /// Out: `u64` number of live allocations.
    Info = 8,
    /// Out: `i64` free bytes over all spaces.
    MemorySizeFreeGet = 9,
    /// Out: `i64` total bytes over all spaces.
    MemorySizeTotalGet = 10,
    /// Out: `u8` mask of configured spaces.
    GetDevices = 11,
    /// Out: `u8` autobalance setting.
    GetAutobalance = 12,
    /// In: `u64` chunk id. Out: `u64` physical base.
    GetBase = 13,
    /// In: `u64` chunk id. Out: `u64` size in bytes.
    GetSize = 14,
    /// Out: `u32` number of configured spaces.
    GetNChunks = 15,
    /// Out: [`CHUNK_TABLE_SIZE`] bytes of per-chunk descriptors.
    GetChunks = 16,
}

impl MemoryCommand {
    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn from_id(id: u32) -> Option<Self> {
        Some(match id {
            0 => Self::Alloc,
            1 => Self::Free,
            2 => Self::Size,
            3 => Self::Buffer,
            4 => Self::Flush,
            5 => Self::FlushSpecific,
            6 => Self::InvalidateSpecific,
            7 => Self::FlushInvalidateSpecific,
            8 => Self::Info,
            9 => Self::MemorySizeFreeGet,
            10 => Self::MemorySizeTotalGet,
            11 => Self::GetDevices,
            12 => Self::GetAutobalance,
            13 => Self::GetBase,
            14 => Self::GetSize,
            15 => Self::GetNChunks,
            16 => Self::GetChunks,
            _ => return None,
        })
    }
}

impl From<MemoryCommand> for u32 {
    fn from(value: MemoryCommand) -> Self {
        value.id()
    }
}

/// Bytes per entry of the [`MemoryCommand::GetChunks`] reply: base and size,
/// both `u64`. Unconfigured chunks are all zero.
pub const CHUNK_DESCRIPTOR_SIZE: usize = 16;

/// Length of the [`MemoryCommand::GetChunks`] reply, one entry per chunk id.
pub const CHUNK_TABLE_SIZE: usize = CHUNK_DESCRIPTOR_SIZE * MAX_SPACES;

/// Return codes of the memory service.
pub mod status {
    pub const OK: u32 = 0;
    /// Allocation failed.
    pub const ENOMEM: u32 = 12;
    /// Bad argument, e.g. freeing an address that is not allocated.
    pub const EINVAL: u32 = 22;
    /// Command not implemented.
    pub const ENOSYS: u32 = 38;
}
