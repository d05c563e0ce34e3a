//! # Contiguous memory client
//!
//! User-side view of the memory service: allocate and free physically
//! contiguous blocks, query the configured chunks, and optionally map the
//! blocks into the current context.
//!
//! ```no_run
//! # use cma_abi::{Access, MemoryFlags};
//! # use cma_client::MemoryClient;
//! # use kernel_rpc::RpcBus;
//! # fn demo(bus: &RpcBus) -> Result<(), cma_client::ClientError> {
//! let mut client = MemoryClient::connect(bus, 1000, None)?;
//! let flags = MemoryFlags::new().with_contiguous(true).with_page_alignment();
//! let block = client.alloc(0x4000, flags)?;
//! println!("0x{:X} bytes at {}", block.size(), block.physical());
//! client.free(block)?;
//! client.close()
//! # }
//! ```
//!
//! Blocks a process never frees are reclaimed by the kernel when the
//! process exits; mappings created through the client are not.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;

use alloc::boxed::Box;
use alloc::vec::Vec;
use cma_abi::{
    ANY_CHUNK, Access, AllocRequest, CHUNK_DESCRIPTOR_SIZE, CHUNK_TABLE_SIZE, MEMORY_SERVICE_NAME,
    MemArea, MemoryCommand, MemoryFlags, status,
};
use kernel_memmap::MappingBackend;
use kernel_memory_addresses::{Alignment, PhysicalAddress, VirtualAddress};
use kernel_rpc::{DriverHandle, RpcBus, Wire};
use log::{debug, warn};

pub use error::ClientError;

/// One allocation owned by this client, with the aliases it mapped.
#[derive(Debug)]
#[must_use = "unreleased blocks stay allocated until the process exits"]
pub struct MemoryHandle {
    area: MemArea,
}

impl MemoryHandle {
    #[must_use]
    pub const fn physical(&self) -> PhysicalAddress {
        self.area.physical()
    }

    /// Size in bytes, rounded up to the chunk granule.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.area.size
    }

    /// Chunk holding the block.
    #[must_use]
    pub const fn chunk_id(&self) -> u8 {
        self.area.chunk_id
    }

    /// The alias mapped with `access`, if any.
    #[must_use]
    pub const fn mapping(&self, access: Access) -> Option<VirtualAddress> {
        self.area.alias(access)
    }
}

/// Connection to the memory service.
pub struct MemoryClient {
    driver: DriverHandle,
    backend: Option<Box<dyn MappingBackend>>,
}

impl MemoryClient {
    #[must_use]
    pub fn new(driver: DriverHandle, backend: Option<Box<dyn MappingBackend>>) -> Self {
        Self { driver, backend }
    }

    /// Open the memory service on `bus` as process `pid`.
    ///
    /// # Errors
    /// [`ClientError::ServiceNotFound`] if no memory service is registered.
    pub fn connect(
        bus: &RpcBus,
        pid: u32,
        backend: Option<Box<dyn MappingBackend>>,
    ) -> Result<Self, ClientError> {
        let driver = bus
            .open_driver(MEMORY_SERVICE_NAME, pid)
            .ok_or(ClientError::ServiceNotFound(MEMORY_SERVICE_NAME))?;
        Ok(Self::new(driver, backend))
    }

    /// Allocate `size` bytes.
    ///
    /// Alignment and chunk come from `flags`; without an alignment selector
    /// the chunk granule applies, without a chunk the first chunk with room
    /// is used. With [`MemoryFlags::zero`] the block is cleared by the
    /// service.
    ///
    /// # Errors
    /// [`ClientError::InvalidAlignment`] for a byte-N exponent out of range,
    /// [`ClientError::OutOfMemory`] if the service could not satisfy the
    /// request, transport errors otherwise.
    pub fn alloc(&mut self, size: u64, flags: MemoryFlags) -> Result<MemoryHandle, ClientError> {
        let align = flags
            .requested_alignment()
            .map_err(ClientError::InvalidAlignment)?
            .map_or(0, Alignment::get);
        let chunk = flags.chunk_id().unwrap_or(ANY_CHUNK);
        let mut request = AllocRequest::new(size, align, chunk, flags);

        let code = self.driver.call_struct(MemoryCommand::Alloc.id(), &mut request)?;
        if code != status::OK || request.ret_phys_pointer == 0 {
            debug!("alloc of 0x{size:X} refused with status {code}");
            return Err(ClientError::OutOfMemory(size));
        }

        let phys = PhysicalAddress::new(request.ret_phys_pointer);
        Ok(MemoryHandle {
            area: MemArea::new(self.driver.client_pid(), phys, request.size, request.chunk_id),
        })
    }

    /// Unmap every alias of `handle` and give the block back.
    ///
    /// # Errors
    /// [`ClientError::Status`] if the service does not know the block.
    pub fn free(&mut self, mut handle: MemoryHandle) -> Result<(), ClientError> {
        self.unmap_all(&mut handle);
        let phys = handle.physical().as_u64();
        match self.driver.call_in(MemoryCommand::Free.id(), &phys.to_wire())? {
            status::OK => Ok(()),
            code => Err(ClientError::Status {
                command: MemoryCommand::Free,
                code,
            }),
        }
    }

    /// Map `handle` with the cache policy `access`; repeated calls return
    /// the existing alias.
    ///
    /// # Errors
    /// [`ClientError::NoBackend`] without a mapping backend,
    /// [`ClientError::MapFailed`] for [`Access::Physical`] or if the backend
    /// refuses.
    pub fn map(
        &self,
        handle: &mut MemoryHandle,
        access: Access,
    ) -> Result<VirtualAddress, ClientError> {
        if access == Access::Physical {
            return Err(ClientError::MapFailed(handle.physical()));
        }
        if let Some(va) = handle.mapping(access) {
            return Ok(va);
        }
        let backend = self.backend.as_deref().ok_or(ClientError::NoBackend)?;
        let va = backend
            .map(handle.physical(), handle.size(), access)
            .ok_or(ClientError::MapFailed(handle.physical()))?;
        handle.area.set_alias(access, va);
        Ok(va)
    }

    /// Drop the `access` alias of `handle`, if present.
    ///
    /// # Errors
    /// The backend's unmap error.
    pub fn unmap(&self, handle: &mut MemoryHandle, access: Access) -> Result<(), ClientError> {
        let Some(va) = handle.area.take_alias(access) else {
            return Ok(());
        };
        let backend = self.backend.as_deref().ok_or(ClientError::NoBackend)?;
        backend.unmap(va, handle.size())?;
        Ok(())
    }

    fn unmap_all(&self, handle: &mut MemoryHandle) {
        for access in Access::MAPPINGS {
            if let Err(e) = self.unmap(handle, access) {
                warn!("unmapping {access:?} alias of {} failed: {e}", handle.physical());
            }
        }
    }

    /// Size the service recorded for the block at `phys`, rounded to the
    /// chunk granule.
    ///
    /// # Errors
    /// [`ClientError::Status`] if nothing is allocated at `phys`.
    pub fn size_of(&mut self, phys: PhysicalAddress) -> Result<u64, ClientError> {
        self.query(MemoryCommand::Size, Some(&phys.as_u64()))
    }

    /// Live allocations over all processes.
    ///
    /// # Errors
    /// Transport errors.
    pub fn allocation_count(&mut self) -> Result<u64, ClientError> {
        self.query_none(MemoryCommand::Info)
    }

    /// Bytes managed over all chunks.
    ///
    /// # Errors
    /// Transport errors.
    pub fn total_size(&mut self) -> Result<u64, ClientError> {
        let total: i64 = self.query_none(MemoryCommand::MemorySizeTotalGet)?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Free bytes over all chunks.
    ///
    /// # Errors
    /// Transport errors.
    pub fn free_size(&mut self) -> Result<u64, ClientError> {
        let free: i64 = self.query_none(MemoryCommand::MemorySizeFreeGet)?;
        Ok(u64::try_from(free).unwrap_or(0))
    }

    /// # Errors
    /// [`ClientError::Status`] if chunk `id` is not configured.
    pub fn chunk_base(&mut self, id: u8) -> Result<PhysicalAddress, ClientError> {
        self.query(MemoryCommand::GetBase, Some(&u64::from(id)))
            .map(PhysicalAddress::new)
    }

    /// # Errors
    /// [`ClientError::Status`] if chunk `id` is not configured.
    pub fn chunk_size(&mut self, id: u8) -> Result<u64, ClientError> {
        self.query(MemoryCommand::GetSize, Some(&u64::from(id)))
    }

    /// Bit `n` is set if chunk `n` is configured.
    ///
    /// # Errors
    /// Transport errors.
    pub fn devices(&mut self) -> Result<u8, ClientError> {
        self.query_none(MemoryCommand::GetDevices)
    }

    /// # Errors
    /// Transport errors.
    pub fn chunk_count(&mut self) -> Result<u32, ClientError> {
        self.query_none(MemoryCommand::GetNChunks)
    }

    /// `(id, base, size)` of every configured chunk.
    ///
    /// # Errors
    /// Transport errors or a failing status.
    pub fn chunks(&mut self) -> Result<Vec<(u8, PhysicalAddress, u64)>, ClientError> {
        let mut table = [0u8; CHUNK_TABLE_SIZE];
        let code = self.driver.call_out(MemoryCommand::GetChunks.id(), &mut table)?;
        if code != status::OK {
            return Err(ClientError::Status {
                command: MemoryCommand::GetChunks,
                code,
            });
        }

        Ok(table
            .chunks_exact(CHUNK_DESCRIPTOR_SIZE)
            .enumerate()
            .filter_map(|(id, entry)| {
                let base = u64::read_from(&entry[..8])?;
                let size = u64::read_from(&entry[8..])?;
                let id = u8::try_from(id).ok()?;
                (size > 0).then_some((id, PhysicalAddress::new(base), size))
            })
            .collect())
    }

    /// Close the connection. Blocks still held stay allocated until freed by
    /// the kernel's exit sweep.
    ///
    /// # Errors
    /// [`TransportError::Closed`](kernel_rpc::TransportError::Closed) if
    /// already closed.
    pub fn close(mut self) -> Result<(), ClientError> {
        Ok(self.driver.close()?)
    }

    fn query<I: Wire, O: Wire>(
        &mut self,
        command: MemoryCommand,
        input: Option<&I>,
    ) -> Result<O, ClientError> {
        match self.driver.call_value::<I, O>(command.id(), input)? {
            (status::OK, Some(value)) => Ok(value),
            (status::OK, None) => Err(ClientError::NoReply(command)),
            (code, _) => Err(ClientError::Status { command, code }),
        }
    }

    fn query_none<O: Wire>(&mut self, command: MemoryCommand) -> Result<O, ClientError> {
        self.query::<u8, O>(command, None)
    }
}
