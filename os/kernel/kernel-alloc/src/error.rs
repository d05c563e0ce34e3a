use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// Which of the two node pools ran dry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeKind {
    Chunk,
    Address,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk => f.write_str("chunk"),
            Self::Address => f.write_str("address"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error("address space {0} is not configured")]
    UnknownSpace(u8),

    #[error("address space {0} is already configured")]
    SpaceInUse(u8),

    #[error("invalid address space configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("alignment 0x{0:X} is not a power of two")]
    InvalidAlignment(u64),

    #[error("zero-sized allocation")]
    ZeroSize,

    /// Capacity: the fixed node pool is exhausted.
    #[error("out of {0} nodes")]
    OutOfNodes(NodeKind),

    /// No free range can hold the request.
    #[error("no free range fits 0x{size:X} bytes aligned to 0x{align:X}")]
    NoFit { size: u64, align: u64 },

    /// The address is not the start of a live allocation.
    #[error("{0} is not the start of an allocation")]
    InvalidFree(PhysicalAddress),
}
