use cma_abi::Access;
use kernel_alloc::AllocError;
use kernel_memmap::MapError;
use kernel_memory_addresses::PhysicalAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("chunk {0} has no registry table")]
    UnknownChunk(u8),

    #[error("chunk {0} already has a registry table")]
    TableExists(u8),

    #[error("invalid registry range: {0}")]
    InvalidRange(&'static str),

    #[error("{0} lies outside every registered chunk")]
    OutOfRange(PhysicalAddress),

    #[error("{0} is not aligned to its chunk granule")]
    Misaligned(PhysicalAddress),

    #[error("no allocation is registered at {0}")]
    NotRegistered(PhysicalAddress),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CmaError {
    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Unmap(#[from] MapError),

    #[error("no configured chunk can hold 0x{0:X} bytes")]
    NoSpace(u64),

    #[error("cannot map {phys} as {access:?}")]
    MapFailed {
        phys: PhysicalAddress,
        access: Access,
    },

    #[error("{0:?} is not a virtual mapping kind")]
    NotAMapping(Access),
}
