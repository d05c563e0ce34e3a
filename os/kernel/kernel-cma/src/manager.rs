use crate::error::{CmaError, RegistryError};
use crate::registry::{ChunkRegistry, SlotTable};
use alloc::vec::Vec;
use cma_abi::limits::MAX_SPACES;
use cma_abi::{Access, MemArea};
use kernel_alloc::{AddressSpace, AddressSpaceAllocator, AllocError, SpaceConfig};
use kernel_memmap::MappingBackend;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::TicketLock;
use log::{debug, error, info, warn};

struct State {
    allocator: AddressSpaceAllocator,
    registry: ChunkRegistry,
}

/// Contiguous memory manager: allocator, ownership registry and mapping
/// backend behind one lock.
///
/// Allocation and registration of a block happen in the same critical
/// section, so an owner sweep never sees a half-committed allocation.
/// Backend calls never run under the lock: a block's aliases are torn down
/// after its record leaves the registry and before the allocator gets the
/// block back.
pub struct MemoryManager<B> {
    state: TicketLock<State>,
    backend: B,
}

impl<B: MappingBackend> MemoryManager<B> {
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self {
            state: TicketLock::new(State {
                allocator: AddressSpaceAllocator::new(),
                registry: ChunkRegistry::new(),
            }),
            backend,
        }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Configure an address space and its ownership table.
    ///
    /// Node pools and the slot table are allocated here, before the lock is
    /// taken; this must only be called from a context that may allocate.
    ///
    /// # Errors
    /// Any [`AllocError`] from validating `config`, or
    /// [`AllocError::SpaceInUse`] if the id is taken.
    pub fn init_space(&self, config: SpaceConfig) -> Result<(), CmaError> {
        let space = AddressSpace::new(&config)?;
        let table = SlotTable::new(config.space_id, space.base(), space.end(), space.alignment())?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.allocator.is_configured(config.space_id)
            || state.registry.is_configured(config.space_id)
        {
            return Err(AllocError::SpaceInUse(config.space_id).into());
        }
        state.allocator.install(space)?;
        if let Err(e) = state.registry.install(table) {
            if let Err(rollback) = state.allocator.deinit(config.space_id) {
                error!("cma: rolling back space {} failed: {rollback}", config.space_id);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Release every live allocation of `space_id`, then tear the space down.
    ///
    /// Returns the number of allocations that were still live.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`] if the space is not configured.
    pub fn deinit_space(&self, space_id: u8) -> Result<usize, CmaError> {
        let taken = {
            let mut guard = self.state.lock();
            if !guard.allocator.is_configured(space_id) {
                return Err(AllocError::UnknownSpace(space_id).into());
            }
            guard.registry.take_chunk(space_id)
        };
        let released = self.release(taken);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let late = state.registry.deinit(space_id)?;
        if late > 0 {
            warn!("cma: {late} allocations raced the teardown of space {space_id}");
        }
        state.allocator.deinit(space_id)?;
        info!("cma: space {space_id} torn down, {released} allocations released");
        Ok(released)
    }

    /// Release everything and drop every space. Returns the allocations
    /// that were still live.
    pub fn shutdown(&self) -> usize {
        let taken = self.state.lock().registry.take_all();
        let released = self.release(taken);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let late = state.registry.deinit_all();
        if late > 0 {
            warn!("cma: {late} allocations raced the shutdown");
        }
        for id in (0..MAX_SPACES).filter_map(|id| u8::try_from(id).ok()) {
            if !state.allocator.is_configured(id) {
                continue;
            }
            if let Err(e) = state.allocator.deinit(id) {
                error!("cma: dropping space {id} failed: {e}");
            }
        }
        if released > 0 {
            warn!("cma: shutdown released {released} live allocations");
        }
        released
    }

    /// Allocate `size` bytes for `pid` and record the owner.
    ///
    /// `align` of zero means the space granule. Without a `chunk_id` the
    /// spaces are tried in id order and the first one that fits wins.
    ///
    /// # Errors
    /// The allocator's error for an explicit chunk, [`CmaError::NoSpace`] if
    /// no space could satisfy an unrestricted request.
    pub fn alloc(
        &self,
        size: u64,
        align: u64,
        chunk_id: Option<u8>,
        pid: u32,
    ) -> Result<PhysicalAddress, CmaError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (space_id, phys) = match chunk_id {
            Some(id) => (id, state.allocator.allocate(id, size, align)?),
            None => Self::allocate_any(&mut state.allocator, size, align)?,
        };

        let rounded = state.allocator.allocation_size(space_id, phys).unwrap_or(size);
        if let Err(e) = state.registry.register(MemArea::new(pid, phys, rounded, space_id)) {
            error!("cma: registering {phys} failed: {e}");
            if let Err(rollback) = state.allocator.free(space_id, phys) {
                error!("cma: rolling back {phys} failed, block leaked: {rollback}");
            }
            return Err(e.into());
        }

        debug!("cma: pid {pid} got 0x{rounded:X} bytes at {phys} in chunk {space_id}");
        Ok(phys)
    }

    fn allocate_any(
        allocator: &mut AddressSpaceAllocator,
        size: u64,
        align: u64,
    ) -> Result<(u8, PhysicalAddress), CmaError> {
        for id in (0..MAX_SPACES).filter_map(|id| u8::try_from(id).ok()) {
            if !allocator.is_configured(id) {
                continue;
            }
            match allocator.allocate(id, size, align) {
                Ok(phys) => return Ok((id, phys)),
                Err(e @ (AllocError::ZeroSize | AllocError::InvalidAlignment(_))) => {
                    return Err(e.into());
                }
                Err(_) => {}
            }
        }
        Err(CmaError::NoSpace(size))
    }

    /// Unmap every alias of the allocation at `phys` and release it.
    ///
    /// Returns the size that went back to the allocator.
    ///
    /// # Errors
    /// [`RegistryError`] if nothing is registered at
    /// `phys`.
    pub fn free(&self, phys: PhysicalAddress) -> Result<u64, CmaError> {
        let mut area = self.state.lock().registry.unregister(phys)?;
        // The block stays allocated while its aliases go away.
        self.teardown(&mut area);
        let size = self.state.lock().allocator.free(area.chunk_id, phys)?;
        debug!("cma: pid {} released {phys}", area.pid);
        Ok(size)
    }

    /// Virtual alias of the allocation at `phys` with cache policy `access`,
    /// creating it on first use.
    ///
    /// # Errors
    /// [`CmaError::NotAMapping`] for [`Access::Physical`],
    /// [`CmaError::MapFailed`] if the backend cannot map the range.
    pub fn map(&self, phys: PhysicalAddress, access: Access) -> Result<VirtualAddress, CmaError> {
        if access == Access::Physical {
            return Err(CmaError::NotAMapping(access));
        }

        let size = {
            let guard = self.state.lock();
            let area = guard.registry.find(phys).ok_or(RegistryError::NotRegistered(phys))?;
            if let Some(va) = area.alias(access) {
                return Ok(va);
            }
            area.size
        };

        let va = self
            .backend
            .map(phys, size, access)
            .ok_or(CmaError::MapFailed { phys, access })?;

        let mut guard = self.state.lock();
        let published = match guard.registry.find_mut(phys) {
            Some(area) if area.size == size => match area.alias(access) {
                Some(existing) => Err(Some(existing)),
                None => {
                    area.set_alias(access, va);
                    Ok(va)
                }
            },
            _ => Err(None),
        };
        drop(guard);

        match published {
            Ok(va) => Ok(va),
            Err(existing) => {
                // Lost a race with another map, a free, or a reallocation.
                if let Err(e) = self.backend.unmap(va, size) {
                    error!("cma: unmapping surplus alias {va:?} of {phys} failed: {e}");
                }
                existing.ok_or_else(|| RegistryError::NotRegistered(phys).into())
            }
        }
    }

    /// Drop the `access` alias of the allocation at `phys`, if present.
    ///
    /// # Errors
    /// [`CmaError::Registry`] if nothing is registered at `phys`, or the
    /// backend's unmap error.
    pub fn unmap(&self, phys: PhysicalAddress, access: Access) -> Result<(), CmaError> {
        let taken = {
            let mut guard = self.state.lock();
            let area = guard
                .registry
                .find_mut(phys)
                .ok_or(RegistryError::NotRegistered(phys))?;
            area.take_alias(access).map(|va| (va, area.size))
        };
        if let Some((va, size)) = taken {
            self.backend.unmap(va, size)?;
        }
        Ok(())
    }

    /// Copy of the ownership record at `phys`.
    #[must_use]
    pub fn area(&self, phys: PhysicalAddress) -> Option<MemArea> {
        self.state.lock().registry.find(phys).copied()
    }

    /// Release every allocation owned by `pid`, tearing down its mappings.
    pub fn release_process(&self, pid: u32) -> usize {
        let taken = self.state.lock().registry.take_for_owner(pid);
        let released = self.release(taken);
        if released > 0 {
            debug!("cma: released {released} allocations of pid {pid}");
        }
        released
    }

    /// Tear down the aliases of records already taken out of the registry,
    /// then hand their blocks back to the allocator.
    fn release(&self, mut areas: Vec<MemArea>) -> usize {
        for area in &mut areas {
            self.teardown(area);
        }
        let mut guard = self.state.lock();
        for area in &areas {
            if let Err(e) = guard.allocator.free(area.chunk_id, area.physical()) {
                error!("cma: releasing {} failed, block leaked: {e}", area.physical());
            }
        }
        areas.len()
    }

    /// Clear `size` bytes at `phys` through a temporary uncached mapping.
    ///
    /// # Errors
    /// [`CmaError::MapFailed`] if the backend cannot reach the range.
    pub fn zero(&self, phys: PhysicalAddress, size: u64) -> Result<(), CmaError> {
        let access = Access::NonCachedNonBufferable;
        let va = self
            .backend
            .map(phys, size, access)
            .ok_or(CmaError::MapFailed { phys, access })?;
        // SAFETY: the backend just mapped [va, va + size) writable.
        unsafe { self.backend.fill_zero(va, size) };
        self.backend.unmap(va, size)?;
        Ok(())
    }

    fn teardown(&self, area: &mut MemArea) {
        for access in Access::MAPPINGS {
            if let Some(va) = area.take_alias(access)
                && let Err(e) = self.backend.unmap(va, area.size)
            {
                error!("cma: unmapping {va:?} of {} failed: {e}", area.physical());
            }
        }
    }

    /// Whether the manager lock is held right now. Racy; for diagnostics.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    /// Live allocations across all spaces.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.state.lock().registry.total_allocations()
    }

    /// Live allocations in one space.
    #[must_use]
    pub fn allocation_count_in(&self, space_id: u8) -> u64 {
        self.state.lock().registry.allocation_count(space_id)
    }

    #[must_use]
    pub fn allocation_size(&self, phys: PhysicalAddress) -> Option<u64> {
        self.area(phys).map(|area| area.size)
    }

    #[must_use]
    pub fn total_size(&self, space_id: u8) -> Option<u64> {
        self.state.lock().allocator.total_size(space_id)
    }

    #[must_use]
    pub fn free_size(&self, space_id: u8) -> Option<u64> {
        self.state.lock().allocator.free_size(space_id)
    }

    #[must_use]
    pub fn physical_base(&self, space_id: u8) -> Option<PhysicalAddress> {
        self.state.lock().allocator.physical_base(space_id)
    }

    #[must_use]
    pub fn memory_size_total(&self) -> u64 {
        self.state.lock().allocator.configured().map(AddressSpace::total_size).sum()
    }

    #[must_use]
    pub fn memory_size_free(&self) -> u64 {
        self.state.lock().allocator.configured().map(AddressSpace::free_size).sum()
    }

    /// Bit `n` is set if space `n` is configured.
    #[must_use]
    pub fn devices_mask(&self) -> u8 {
        self.state.lock().allocator.configured_mask()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().allocator.configured_count()
    }
}

impl<B> Drop for MemoryManager<B> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let live = state.registry.total_allocations();
        if live > 0 {
            warn!("cma: manager dropped with {live} live allocations");
        }
    }
}
