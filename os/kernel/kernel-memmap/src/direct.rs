use crate::{MapError, MapSource, MappingBackend};
use cma_abi::Access;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::error;

/// Fixed-offset translation of a physical window.
///
/// With a higher-half direct map every physical address `pa` inside the
/// window is visible at `pa + offset`. The translation wraps, so a window
/// can also be placed over an ordinary buffer by choosing
/// `offset = buffer - window_start`.
///
/// # Safety
/// Constructing the backend is safe, dereferencing its results is not: the
/// direct map must really cover the window with the required permissions.
#[derive(Debug, Clone)]
pub struct DirectMapBackend {
    offset: u64,
    start: PhysicalAddress,
    end: PhysicalAddress,
}

impl DirectMapBackend {
    #[must_use]
    pub const fn new(offset: u64, start: PhysicalAddress, size: u64) -> Self {
        Self {
            offset,
            start,
            end: PhysicalAddress::new(start.as_u64().saturating_add(size)),
        }
    }

    /// A window whose first physical byte appears at `virt`.
    #[must_use]
    pub const fn at(virt: VirtualAddress, start: PhysicalAddress, size: u64) -> Self {
        Self::new(virt.as_u64().wrapping_sub(start.as_u64()), start, size)
    }

    #[inline]
    #[must_use]
    pub const fn translate(&self, phys: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(phys.as_u64().wrapping_add(self.offset))
    }

    fn covers(&self, phys: PhysicalAddress, size: u64) -> bool {
        phys >= self.start
            && phys
                .checked_add(size)
                .is_some_and(|end| end <= self.end)
    }
}

impl MappingBackend for DirectMapBackend {
    fn source(&self) -> MapSource {
        MapSource::Kernel
    }

    fn map(&self, phys: PhysicalAddress, size: u64, _access: Access) -> Option<VirtualAddress> {
        if !self.covers(phys, size) {
            error!(
                "direct map: {phys}+0x{size:X} outside window {}..{}",
                self.start, self.end
            );
            return None;
        }
        Some(self.translate(phys))
    }

    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        let phys = PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset));
        if self.covers(phys, size) {
            Ok(())
        } else {
            Err(MapError::NotMapped(va))
        }
    }
}
