use cma_abi::MemoryCommand;
use kernel_memmap::MapError;
use kernel_memory_addresses::PhysicalAddress;
use kernel_rpc::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("memory service {0:?} is not registered")]
    ServiceNotFound(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{command:?} failed with status {code}")]
    Status { command: MemoryCommand, code: u32 },

    #[error("{0:?} returned no value")]
    NoReply(MemoryCommand),

    #[error("alignment exponent {0} is out of range")]
    InvalidAlignment(u8),

    #[error("no memory for 0x{0:X} bytes")]
    OutOfMemory(u64),

    #[error("client has no mapping backend")]
    NoBackend,

    #[error("cannot map {0}")]
    MapFailed(PhysicalAddress),

    #[error(transparent)]
    Unmap(#[from] MapError),
}
