use crate::error::RegistryError;
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use cma_abi::MemArea;
use cma_abi::limits::MAX_SPACES;
use kernel_alloc::AddressSpaceAllocator;
use kernel_memory_addresses::{Alignment, PhysicalAddress};
use log::{debug, warn};

/// Direct-indexed ownership slots of one address space.
///
/// Slot `i` describes the allocation starting at `base + i * alignment`.
/// Built with [`SlotTable::new`] outside any lock and published through
/// [`ChunkRegistry::install`].
#[derive(Debug)]
pub struct SlotTable {
    space_id: u8,
    base: PhysicalAddress,
    end: PhysicalAddress,
    alignment: Alignment,
    slots: Vec<Option<Box<MemArea>>>,
}

impl SlotTable {
    /// One slot per granule of `[base, end)`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChunk`] for ids beyond [`MAX_SPACES`],
    /// [`RegistryError::InvalidRange`] for empty or misaligned ranges.
    pub fn new(
        space_id: u8,
        base: PhysicalAddress,
        end: PhysicalAddress,
        alignment: Alignment,
    ) -> Result<Self, RegistryError> {
        if usize::from(space_id) >= MAX_SPACES {
            return Err(RegistryError::UnknownChunk(space_id));
        }
        let Some(length) = end.offset_from(base).filter(|&l| l > 0) else {
            return Err(RegistryError::InvalidRange("end must lie above base"));
        };
        if !base.is_aligned(alignment) {
            return Err(RegistryError::InvalidRange("base is not aligned to the granule"));
        }
        let count = usize::try_from(length >> alignment.log2())
            .map_err(|_| RegistryError::InvalidRange("too many granules"))?;

        Ok(Self {
            space_id,
            base,
            end,
            alignment,
            slots: vec![None; count],
        })
    }

    #[must_use]
    pub const fn space_id(&self) -> u8 {
        self.space_id
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn contains(&self, addr: PhysicalAddress) -> bool {
        addr >= self.base && addr < self.end
    }

    fn index_of(&self, addr: PhysicalAddress) -> Result<usize, RegistryError> {
        if !addr.is_aligned(self.alignment) {
            return Err(RegistryError::Misaligned(addr));
        }
        addr.offset_from(self.base)
            .and_then(|offset| usize::try_from(offset >> self.alignment.log2()).ok())
            .filter(|&index| index < self.slots.len())
            .ok_or(RegistryError::OutOfRange(addr))
    }
}

/// Ownership records of every live allocation, keyed by physical address.
///
/// Lookups are O(1) once the owning space is known: the offset from the
/// space base divided by the granule is the slot index.
#[derive(Debug)]
pub struct ChunkRegistry {
    tables: [Option<SlotTable>; MAX_SPACES],
    allocated: [u64; MAX_SPACES],
}

impl Default for ChunkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables: [const { None }; MAX_SPACES],
            allocated: [0; MAX_SPACES],
        }
    }

    /// Build and install the slot table of `space_id`.
    ///
    /// # Errors
    /// See [`SlotTable::new`] and [`install`](Self::install).
    pub fn init(
        &mut self,
        space_id: u8,
        base: PhysicalAddress,
        end: PhysicalAddress,
        alignment: Alignment,
    ) -> Result<(), RegistryError> {
        if self.table(space_id).is_some() {
            return Err(RegistryError::TableExists(space_id));
        }
        self.install(SlotTable::new(space_id, base, end, alignment)?)
    }

    /// Publish a prepared table.
    ///
    /// # Errors
    /// [`RegistryError::TableExists`] if the space already has one.
    pub fn install(&mut self, table: SlotTable) -> Result<(), RegistryError> {
        let id = usize::from(table.space_id);
        let Some(entry) = self.tables.get_mut(id) else {
            return Err(RegistryError::UnknownChunk(table.space_id));
        };
        if entry.is_some() {
            return Err(RegistryError::TableExists(table.space_id));
        }
        debug!(
            "registry: chunk {} tracks {} slots of {}",
            table.space_id,
            table.slots.len(),
            table.alignment
        );
        *entry = Some(table);
        self.allocated[id] = 0;
        Ok(())
    }

    /// Drop the table of `space_id` together with any records still in it.
    ///
    /// Returns the number of records dropped. The caller is expected to have
    /// released them through the allocator already.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChunk`] if the space has no table.
    pub fn deinit(&mut self, space_id: u8) -> Result<usize, RegistryError> {
        let id = usize::from(space_id);
        let table = self
            .tables
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(RegistryError::UnknownChunk(space_id))?;
        let dropped = table.slots.iter().flatten().count();
        if dropped > 0 {
            warn!("registry: chunk {space_id} torn down with {dropped} live records");
        }
        self.allocated[id] = 0;
        Ok(dropped)
    }

    /// [`deinit`](Self::deinit) every table; returns the records dropped.
    pub fn deinit_all(&mut self) -> usize {
        (0..MAX_SPACES)
            .filter_map(|id| u8::try_from(id).ok())
            .filter_map(|id| self.deinit(id).ok())
            .sum()
    }

    #[must_use]
    pub fn is_configured(&self, space_id: u8) -> bool {
        self.table(space_id).is_some()
    }

    fn table(&self, space_id: u8) -> Option<&SlotTable> {
        self.tables.get(usize::from(space_id)).and_then(Option::as_ref)
    }

    /// Space and slot index of `addr`.
    ///
    /// # Errors
    /// [`RegistryError::OutOfRange`] if no table covers `addr`,
    /// [`RegistryError::Misaligned`] if it is not on a granule boundary.
    pub fn locate(&self, addr: PhysicalAddress) -> Result<(u8, usize), RegistryError> {
        let table = self
            .tables
            .iter()
            .flatten()
            .find(|t| t.contains(addr))
            .ok_or(RegistryError::OutOfRange(addr))?;
        Ok((table.space_id, table.index_of(addr)?))
    }

    /// Record a new allocation in the slot of its physical address.
    ///
    /// The slot must be empty: the allocator never hands out the same start
    /// twice while it is live. A stale record in the slot is replaced.
    ///
    /// # Errors
    /// [`RegistryError::UnknownChunk`] for an unconfigured `chunk_id`,
    /// [`RegistryError::OutOfRange`] or [`RegistryError::Misaligned`] for an
    /// address the chunk's table cannot index.
    pub fn register(&mut self, area: MemArea) -> Result<(), RegistryError> {
        let chunk = area.chunk_id;
        let addr = area.physical();
        let id = usize::from(chunk);
        let table = self
            .tables
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or(RegistryError::UnknownChunk(chunk))?;
        if !table.contains(addr) {
            return Err(RegistryError::OutOfRange(addr));
        }
        let index = table.index_of(addr)?;

        if table.slots[index].replace(Box::new(area)).is_some() {
            warn!("registry: replaced stale record at {addr}");
        } else {
            self.allocated[id] += 1;
        }
        Ok(())
    }

    #[must_use]
    pub fn find(&self, addr: PhysicalAddress) -> Option<&MemArea> {
        let (space, index) = self.locate(addr).ok()?;
        self.table(space)?.slots[index].as_deref()
    }

    #[must_use]
    pub fn find_mut(&mut self, addr: PhysicalAddress) -> Option<&mut MemArea> {
        let (space, index) = self.locate(addr).ok()?;
        self.tables[usize::from(space)].as_mut()?.slots[index].as_deref_mut()
    }

    /// Remove and return the record at `addr`.
    ///
    /// Any virtual alias in the record must already be unmapped.
    ///
    /// # Errors
    /// [`RegistryError::NotRegistered`] if the slot is empty, otherwise see
    /// [`locate`](Self::locate).
    pub fn unregister(&mut self, addr: PhysicalAddress) -> Result<MemArea, RegistryError> {
        let (space, index) = self.locate(addr)?;
        let id = usize::from(space);
        let area = self.tables[id]
            .as_mut()
            .and_then(|t| t.slots[index].take())
            .ok_or(RegistryError::NotRegistered(addr))?;
        self.allocated[id] -= 1;
        Ok(*area)
    }

    /// Release every allocation owned by `pid`. Returns how many were freed.
    pub fn free_for_owner(&mut self, pid: u32, allocator: &mut AddressSpaceAllocator) -> usize {
        self.free_for_owner_with(pid, allocator, |_| {})
    }

    /// [`free_for_owner`](Self::free_for_owner), calling `teardown` on each
    /// record before its memory goes back to the allocator.
    pub fn free_for_owner_with(
        &mut self,
        pid: u32,
        allocator: &mut AddressSpaceAllocator,
        teardown: impl FnMut(&mut MemArea),
    ) -> usize {
        let released = self.sweep(allocator, |area| area.pid == pid, teardown);
        if released > 0 {
            debug!("registry: released {released} allocations of pid {pid}");
        }
        released
    }

    /// Release every allocation. Returns how many were freed.
    pub fn free_all(&mut self, allocator: &mut AddressSpaceAllocator) -> usize {
        self.free_all_with(allocator, |_| {})
    }

    /// [`free_all`](Self::free_all) with a per-record `teardown` hook.
    pub fn free_all_with(
        &mut self,
        allocator: &mut AddressSpaceAllocator,
        teardown: impl FnMut(&mut MemArea),
    ) -> usize {
        self.sweep(allocator, |_| true, teardown)
    }

    /// Remove every record owned by `pid` without releasing its memory.
    ///
    /// The caller tears the records down and hands the blocks back to the
    /// allocator itself; until then they stay allocated.
    pub fn take_for_owner(&mut self, pid: u32) -> Vec<MemArea> {
        let mut taken = Vec::new();
        self.drain(|area| area.pid == pid, None, |area| taken.push(area));
        taken
    }

    /// Remove every record of one space without releasing its memory.
    pub fn take_chunk(&mut self, space_id: u8) -> Vec<MemArea> {
        let mut taken = Vec::new();
        self.drain(|_| true, Some(space_id), |area| taken.push(area));
        taken
    }

    /// Remove every record without releasing its memory.
    pub fn take_all(&mut self) -> Vec<MemArea> {
        let mut taken = Vec::new();
        self.drain(|_| true, None, |area| taken.push(area));
        taken
    }

    fn sweep(
        &mut self,
        allocator: &mut AddressSpaceAllocator,
        select: impl FnMut(&MemArea) -> bool,
        mut teardown: impl FnMut(&mut MemArea),
    ) -> usize {
        self.drain(select, None, |mut area| {
            teardown(&mut area);
            if let Err(e) = allocator.free(area.chunk_id, area.physical()) {
                warn!("registry: releasing {} failed: {e}", area.physical());
            }
        })
    }

    /// Clear every selected slot, passing each record to `each`.
    fn drain(
        &mut self,
        mut select: impl FnMut(&MemArea) -> bool,
        only: Option<u8>,
        mut each: impl FnMut(MemArea),
    ) -> usize {
        let mut drained = 0;
        for (table, allocated) in self.tables.iter_mut().zip(self.allocated.iter_mut()) {
            let Some(table) = table else { continue };
            if only.is_some_and(|id| id != table.space_id) {
                continue;
            }
            for slot in &mut table.slots {
                let Some(area) = slot.take_if(|area| select(area)) else {
                    continue;
                };
                each(*area);
                *allocated -= 1;
                drained += 1;
            }
        }
        drained
    }

    /// Live allocations in `chunk_id`; zero for unconfigured chunks.
    #[must_use]
    pub fn allocation_count(&self, chunk_id: u8) -> u64 {
        self.allocated.get(usize::from(chunk_id)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.allocated.iter().sum()
    }

    /// All live records in address order per space.
    pub fn iter(&self) -> impl Iterator<Item = &MemArea> {
        self.tables
            .iter()
            .flatten()
            .flat_map(|t| t.slots.iter().flatten().map(Box::as_ref))
    }
}
