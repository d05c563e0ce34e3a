use crate::{AddressSpace, AllocError, ChunkInfo, MAX_SPACES, SpaceConfig};
use alloc::vec::Vec;
use kernel_memory_addresses::{Alignment, PhysicalAddress};
use log::{debug, info, warn};

/// The set of configured address spaces, indexed by space id.
pub struct AddressSpaceAllocator {
    spaces: [Option<AddressSpace>; MAX_SPACES],
}

impl Default for AddressSpaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpaceAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            spaces: [const { None }; MAX_SPACES],
        }
    }

    /// Configure a space. The id must be free.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`] for an id out of range,
    /// [`AllocError::SpaceInUse`] if already configured, or any
    /// configuration error from [`AddressSpace::new`].
    pub fn init(&mut self, config: SpaceConfig) -> Result<(), AllocError> {
        match self.spaces.get(usize::from(config.space_id)) {
            None => return Err(AllocError::UnknownSpace(config.space_id)),
            Some(Some(_)) => return Err(AllocError::SpaceInUse(config.space_id)),
            Some(None) => {}
        }
        self.install(AddressSpace::new(&config)?)
    }

    /// Insert an already built space under its own id.
    ///
    /// Lets callers build the node pools outside of a lock and only publish
    /// the finished space inside it.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`] or [`AllocError::SpaceInUse`]; the
    /// space is dropped.
    pub fn install(&mut self, space: AddressSpace) -> Result<(), AllocError> {
        let id = space.id();
        let slot = self
            .spaces
            .get_mut(usize::from(id))
            .ok_or(AllocError::UnknownSpace(id))?;
        if slot.is_some() {
            return Err(AllocError::SpaceInUse(id));
        }
        info!("space {id}: {}..{} granule {}", space.base(), space.end(), space.alignment());
        *slot = Some(space);
        Ok(())
    }

    /// Drop a space together with all of its bookkeeping.
    ///
    /// Outstanding allocations are forgotten; callers release them first.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`] if the space is not configured.
    pub fn deinit(&mut self, space_id: u8) -> Result<AddressSpace, AllocError> {
        let space = self
            .spaces
            .get_mut(usize::from(space_id))
            .and_then(Option::take)
            .ok_or(AllocError::UnknownSpace(space_id))?;
        if space.allocation_count() > 0 {
            warn!(
                "space {space_id}: dropped with {} live allocations",
                space.allocation_count()
            );
        }
        info!("space {space_id}: deinitialized");
        Ok(space)
    }

    /// Allocate `size` bytes in `space_id`. An `align` of zero selects the
    /// space granule.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`], [`AllocError::InvalidAlignment`], or
    /// any error of [`AddressSpace::allocate`].
    pub fn allocate(
        &mut self,
        space_id: u8,
        size: u64,
        align: u64,
    ) -> Result<PhysicalAddress, AllocError> {
        let align = match align {
            0 => None,
            a => Some(Alignment::new(a).ok_or(AllocError::InvalidAlignment(a))?),
        };
        let space = self.space_mut(space_id)?;
        match space.allocate(size, align) {
            Ok(addr) => {
                debug!("space {space_id}: allocated 0x{size:X} bytes at {addr}");
                Ok(addr)
            }
            Err(e) => {
                debug!("space {space_id}: allocation of 0x{size:X} bytes failed: {e}");
                Err(e)
            }
        }
    }

    /// Release the allocation starting at `addr`; returns its rounded size.
    ///
    /// # Errors
    /// [`AllocError::UnknownSpace`] or [`AllocError::InvalidFree`].
    pub fn free(&mut self, space_id: u8, addr: PhysicalAddress) -> Result<u64, AllocError> {
        let size = self.space_mut(space_id)?.free(addr).inspect_err(|e| {
            warn!("space {space_id}: {e}");
        })?;
        debug!("space {space_id}: freed 0x{size:X} bytes at {addr}");
        Ok(size)
    }

    #[must_use]
    pub fn space(&self, space_id: u8) -> Option<&AddressSpace> {
        self.spaces.get(usize::from(space_id))?.as_ref()
    }

    fn space_mut(&mut self, space_id: u8) -> Result<&mut AddressSpace, AllocError> {
        self.spaces
            .get_mut(usize::from(space_id))
            .and_then(Option::as_mut)
            .ok_or(AllocError::UnknownSpace(space_id))
    }

    #[must_use]
    pub fn is_configured(&self, space_id: u8) -> bool {
        self.space(space_id).is_some()
    }

    /// Configured spaces as a bit mask, bit `n` for space `n`.
    #[must_use]
    pub fn configured_mask(&self) -> u8 {
        self.configured()
            .fold(0u8, |mask, s| mask | (1 << s.id()))
    }

    #[must_use]
    pub fn configured_count(&self) -> usize {
        self.configured().count()
    }

    /// Configured spaces in id order.
    pub fn configured(&self) -> impl Iterator<Item = &AddressSpace> {
        self.spaces.iter().flatten()
    }

    /// Id of the space containing `addr`.
    #[must_use]
    pub fn space_of(&self, addr: PhysicalAddress) -> Option<u8> {
        self.configured().find(|s| s.contains(addr)).map(AddressSpace::id)
    }

    #[must_use]
    pub fn total_size(&self, space_id: u8) -> Option<u64> {
        self.space(space_id).map(AddressSpace::total_size)
    }

    #[must_use]
    pub fn free_size(&self, space_id: u8) -> Option<u64> {
        self.space(space_id).map(AddressSpace::free_size)
    }

    #[must_use]
    pub fn physical_base(&self, space_id: u8) -> Option<PhysicalAddress> {
        self.space(space_id).map(AddressSpace::base)
    }

    #[must_use]
    pub fn allocation_size(&self, space_id: u8, addr: PhysicalAddress) -> Option<u64> {
        self.space(space_id)?.allocation_size(addr)
    }

    /// Snapshot of a space's chunk structure.
    #[must_use]
    pub fn chunks(&self, space_id: u8) -> Option<Vec<ChunkInfo>> {
        self.space(space_id).map(AddressSpace::chunks)
    }
}
