//! The memory service: the command interface of [`MemoryManager`] on an
//! [`RpcBus`].

use crate::MemoryManager;
use alloc::sync::Arc;
use cma_abi::{
    ANY_CHUNK, AllocRequest, CHUNK_DESCRIPTOR_SIZE, CHUNK_TABLE_SIZE, MEMORY_SERVICE_NAME,
    MemoryCommand, status,
};
use kernel_memmap::MappingBackend;
use kernel_memory_addresses::PhysicalAddress;
use kernel_rpc::{Dispatcher, RpcBus, ServiceHandle, Wire};
use log::{debug, error, warn};

pub struct MemoryService<B> {
    manager: Arc<MemoryManager<B>>,
}

impl<B: MappingBackend + 'static> MemoryService<B> {
    #[must_use]
    pub const fn new(manager: Arc<MemoryManager<B>>) -> Self {
        Self { manager }
    }

    /// Register under [`MEMORY_SERVICE_NAME`].
    ///
    /// `None` if another memory service is already registered on `bus`.
    pub fn register(self, bus: &RpcBus) -> Option<ServiceHandle> {
        bus.register_service(MEMORY_SERVICE_NAME, move |d, func_id, input| {
            self.dispatch(d, func_id, input)
        })
    }

    /// Handle one call and return its status code.
    pub fn dispatch(&self, d: &mut Dispatcher<'_>, func_id: u32, input: &[u8]) -> u32 {
        let Some(command) = MemoryCommand::from_id(func_id) else {
            warn!("memory service: unknown function {func_id} from pid {}", d.client_pid());
            return status::ENOSYS;
        };

        let manager = &*self.manager;
        match command {
            MemoryCommand::Alloc => self.alloc(d, input),
            MemoryCommand::Free => {
                let Some(phys) = u64::read_from(input) else {
                    return status::EINVAL;
                };
                match manager.free(PhysicalAddress::new(phys)) {
                    Ok(_) => status::OK,
                    Err(e) => {
                        warn!("memory service: pid {} cannot free 0x{phys:X}: {e}", d.client_pid());
                        status::EINVAL
                    }
                }
            }
            MemoryCommand::Size => {
                let Some(size) = u64::read_from(input)
                    .and_then(|phys| manager.allocation_size(PhysicalAddress::new(phys)))
                else {
                    return status::EINVAL;
                };
                reply(d, &size)
            }
            MemoryCommand::Info => reply(d, &manager.allocation_count()),
            MemoryCommand::MemorySizeFreeGet => {
                reply(d, &saturating_i64(manager.memory_size_free()))
            }
            MemoryCommand::MemorySizeTotalGet => {
                reply(d, &saturating_i64(manager.memory_size_total()))
            }
            MemoryCommand::GetDevices => reply(d, &manager.devices_mask()),
            MemoryCommand::GetAutobalance => reply(d, &0u8),
            MemoryCommand::GetBase => {
                match chunk_arg(input).and_then(|id| manager.physical_base(id)) {
                    Some(base) => reply(d, &base.as_u64()),
                    None => status::EINVAL,
                }
            }
            MemoryCommand::GetSize => {
                match chunk_arg(input).and_then(|id| manager.total_size(id)) {
                    Some(size) => reply(d, &size),
                    None => status::EINVAL,
                }
            }
            MemoryCommand::GetNChunks => {
                reply(d, &u32::try_from(manager.chunk_count()).unwrap_or(u32::MAX))
            }
            MemoryCommand::GetChunks => {
                let mut table = [0u8; CHUNK_TABLE_SIZE];
                for (id, entry) in table.chunks_exact_mut(CHUNK_DESCRIPTOR_SIZE).enumerate() {
                    let Ok(id) = u8::try_from(id) else { break };
                    if let (Some(base), Some(size)) =
                        (manager.physical_base(id), manager.total_size(id))
                    {
                        entry[..8].copy_from_slice(&base.as_u64().to_le_bytes());
                        entry[8..].copy_from_slice(&size.to_le_bytes());
                    }
                }
                match d.append_reply(&table) {
                    Ok(()) => status::OK,
                    Err(e) => {
                        warn!("memory service: {e}");
                        status::EINVAL
                    }
                }
            }
            MemoryCommand::Buffer
            | MemoryCommand::Flush
            | MemoryCommand::FlushSpecific
            | MemoryCommand::InvalidateSpecific
            | MemoryCommand::FlushInvalidateSpecific => {
                debug!("memory service: cache maintenance {command:?} not supported");
                status::ENOSYS
            }
        }
    }

    fn alloc(&self, d: &mut Dispatcher<'_>, input: &[u8]) -> u32 {
        let Some(mut request) = AllocRequest::read_from(input) else {
            return status::EINVAL;
        };
        let pid = d.client_pid();
        let chunk = (request.chunk_id != ANY_CHUNK).then_some(request.chunk_id);

        let (code, phys) = match self.manager.alloc(request.size, request.align, chunk, pid) {
            Ok(phys) if request.flags.zero() => match self.manager.zero(phys, request.size) {
                Ok(()) => (status::OK, Some(phys)),
                Err(e) => {
                    error!("memory service: clearing {phys} failed: {e}");
                    self.release(phys);
                    (status::ENOMEM, None)
                }
            },
            Ok(phys) => (status::OK, Some(phys)),
            Err(e) => {
                warn!("memory service: pid {pid} alloc of 0x{:X} failed: {e}", request.size);
                (status::ENOMEM, None)
            }
        };

        request.ret_phys_pointer = phys.map_or(0, PhysicalAddress::as_u64);
        if let Some(area) = phys.and_then(|phys| self.manager.area(phys)) {
            request.size = area.size;
            request.chunk_id = area.chunk_id;
        }
        if let Err(e) = d.append_value(&request) {
            warn!("memory service: cannot return allocation to pid {pid}: {e}");
            if let Some(phys) = phys {
                self.release(phys);
            }
            return status::EINVAL;
        }
        code
    }

    /// Undo an allocation the caller never learnt about.
    fn release(&self, phys: PhysicalAddress) {
        if let Err(e) = self.manager.free(phys) {
            error!("memory service: releasing {phys} failed, block leaked: {e}");
        }
    }
}

fn reply<T: Wire>(d: &mut Dispatcher<'_>, value: &T) -> u32 {
    match d.append_value(value) {
        Ok(()) => status::OK,
        Err(e) => {
            warn!("memory service: {e}");
            status::EINVAL
        }
    }
}

fn chunk_arg(input: &[u8]) -> Option<u8> {
    u64::read_from(input).and_then(|id| u8::try_from(id).ok())
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_alloc::SpaceConfig;
    use kernel_memmap::DirectMapBackend;

    fn service() -> MemoryService<DirectMapBackend> {
        let base = PhysicalAddress::new(0x4000_0000);
        let manager = MemoryManager::new(DirectMapBackend::new(0, base, 0x4_0000));
        manager.init_space(SpaceConfig::new(2, base, 0x4_0000, 0x1000)).unwrap();
        MemoryService::new(Arc::new(manager))
    }

    #[test]
    fn cache_commands_are_not_supported() {
        let service = service();
        let mut d = Dispatcher::new(1, &[], &[]);
        for id in 3..=7 {
            assert_eq!(service.dispatch(&mut d, id, &[]), status::ENOSYS);
        }
        assert_eq!(service.dispatch(&mut d, 99, &[]), status::ENOSYS);
    }

    #[test]
    fn chunk_table_lists_configured_spaces() {
        let service = service();
        let outputs = [CHUNK_TABLE_SIZE];
        let mut d = Dispatcher::new(1, &[], &outputs);
        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::GetChunks.id(), &[]),
            status::OK
        );

        let table = &d.replies()[0];
        let entry = &table[2 * CHUNK_DESCRIPTOR_SIZE..3 * CHUNK_DESCRIPTOR_SIZE];
        assert_eq!(u64::read_from(&entry[..8]), Some(0x4000_0000));
        assert_eq!(u64::read_from(&entry[8..]), Some(0x4_0000));
        assert!(table[..2 * CHUNK_DESCRIPTOR_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn alloc_without_reply_slot_is_undone() {
        let service = service();
        let request = AllocRequest::new(0x1000, 0, ANY_CHUNK, cma_abi::MemoryFlags::new());
        let inputs = [AllocRequest::WIRE_SIZE];
        let mut d = Dispatcher::new(1, &inputs, &[]);

        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::Alloc.id(), &request.to_wire()),
            status::EINVAL
        );
        assert_eq!(service.manager.allocation_count(), 0);
    }

    #[test]
    fn alloc_reply_names_rounded_size_and_chunk() {
        let service = service();
        let request = AllocRequest::new(0x800, 0, ANY_CHUNK, cma_abi::MemoryFlags::new());
        let sizes = [AllocRequest::WIRE_SIZE];
        let mut d = Dispatcher::new(1, &sizes, &sizes);
        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::Alloc.id(), &request.to_wire()),
            status::OK
        );

        let reply = AllocRequest::read_from(&d.replies()[0]).unwrap();
        assert_eq!(reply.ret_phys_pointer, 0x4000_0000);
        assert_eq!(reply.size, 0x1000);
        assert_eq!(reply.chunk_id, 2);
    }

    #[test]
    fn failed_zeroing_gives_the_block_back() {
        let base = PhysicalAddress::new(0x4000_0000);
        // The backend only reaches the first page of the space.
        let manager = MemoryManager::new(DirectMapBackend::new(0, base, 0x1000));
        manager.init_space(SpaceConfig::new(0, base, 0x4_0000, 0x1000)).unwrap();
        let service = MemoryService::new(Arc::new(manager));

        let flags = cma_abi::MemoryFlags::new().with_zero(true);
        let request = AllocRequest::new(0x2000, 0, ANY_CHUNK, flags);
        let sizes = [AllocRequest::WIRE_SIZE];
        let mut d = Dispatcher::new(1, &sizes, &sizes);
        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::Alloc.id(), &request.to_wire()),
            status::ENOMEM
        );

        let reply = AllocRequest::read_from(&d.replies()[0]).unwrap();
        assert_eq!(reply.ret_phys_pointer, 0);
        assert_eq!(service.manager.allocation_count(), 0);
        assert_eq!(service.manager.free_size(0), Some(0x4_0000));
    }

    #[test]
    fn bad_arguments_are_invalid() {
        let service = service();
        let outputs = [8];
        let mut d = Dispatcher::new(1, &[], &outputs);
        assert_eq!(service.dispatch(&mut d, MemoryCommand::Free.id(), &[1, 2]), status::EINVAL);
        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::GetBase.id(), &7u64.to_wire()),
            status::EINVAL
        );
        assert_eq!(
            service.dispatch(&mut d, MemoryCommand::GetBase.id(), &2u64.to_wire()),
            status::OK
        );
        assert_eq!(u64::read_from(&d.replies()[0]), Some(0x4000_0000));
    }
}
