use cma_abi::Access;
use core::ptr;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Which side of the user/kernel boundary a backend serves.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MapSource {
    Kernel,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("{0} is not a mapping of this backend")]
    NotMapped(VirtualAddress),

    #[error("mapping length 0x{0:X} is not representable")]
    BadLength(u64),

    #[cfg(feature = "devmem")]
    #[error("unmap failed: {0}")]
    Os(rustix::io::Errno),
}

/// Strategy for reaching physical memory from the current context.
///
/// The accessors are provided as volatile reads and writes through the
/// mapped address; backends only override them for special address spaces.
///
/// `map` and `unmap` may block (system calls, page table updates that
/// sleep); callers must not hold a spin lock across them.
pub trait MappingBackend: Send + Sync {
    fn source(&self) -> MapSource;

    /// Map `size` bytes at `phys` with the cache policy of `access`.
    ///
    /// Returns `None` (after logging) if the range cannot be mapped.
    fn map(&self, phys: PhysicalAddress, size: u64, access: Access) -> Option<VirtualAddress>;

    /// Tear down a mapping previously returned by [`map`](Self::map) with the
    /// same `size`.
    ///
    /// # Errors
    /// [`MapError`] if `va` was not produced by this backend or the OS
    /// refused to unmap it.
    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError>;

    /// # Safety
    /// `va` must be a live mapping of at least one byte.
    unsafe fn read8(&self, va: VirtualAddress) -> u8 {
        unsafe { ptr::read_volatile(va.as_mut_ptr()) }
    }

    /// # Safety
    /// `va` must be a live, 2-byte aligned mapping of at least two bytes.
    unsafe fn read16(&self, va: VirtualAddress) -> u16 {
        unsafe { ptr::read_volatile(va.as_mut_ptr()) }
    }

    /// # Safety
    /// `va` must be a live, 4-byte aligned mapping of at least four bytes.
    unsafe fn read32(&self, va: VirtualAddress) -> u32 {
        unsafe { ptr::read_volatile(va.as_mut_ptr()) }
    }

    /// # Safety
    /// `va` must be a live, 8-byte aligned mapping of at least eight bytes.
    unsafe fn read64(&self, va: VirtualAddress) -> u64 {
        unsafe { ptr::read_volatile(va.as_mut_ptr()) }
    }

    /// # Safety
    /// `va` must be a live, writable mapping of at least one byte.
    unsafe fn write8(&self, va: VirtualAddress, value: u8) {
        unsafe { ptr::write_volatile(va.as_mut_ptr(), value) }
    }

    /// # Safety
    /// `va` must be a live, writable, 2-byte aligned mapping.
    unsafe fn write16(&self, va: VirtualAddress, value: u16) {
        unsafe { ptr::write_volatile(va.as_mut_ptr(), value) }
    }

    /// # Safety
    /// `va` must be a live, writable, 4-byte aligned mapping.
    unsafe fn write32(&self, va: VirtualAddress, value: u32) {
        unsafe { ptr::write_volatile(va.as_mut_ptr(), value) }
    }

    /// # Safety
    /// `va` must be a live, writable, 8-byte aligned mapping.
    unsafe fn write64(&self, va: VirtualAddress, value: u64) {
        unsafe { ptr::write_volatile(va.as_mut_ptr(), value) }
    }

    /// Zero `size` bytes starting at `va`.
    ///
    /// # Safety
    /// `[va, va + size)` must be a live, writable mapping.
    unsafe fn fill_zero(&self, va: VirtualAddress, size: u64) {
        let mut at = va;
        let end = va.as_u64().saturating_add(size);
        while at.as_u64() < end {
            unsafe { self.write8(at, 0) };
            at += 1;
        }
    }
}

impl<B: MappingBackend + ?Sized> MappingBackend for &B {
    fn source(&self) -> MapSource {
        (**self).source()
    }

    fn map(&self, phys: PhysicalAddress, size: u64, access: Access) -> Option<VirtualAddress> {
        (**self).map(phys, size, access)
    }

    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        (**self).unmap(va, size)
    }
}
