use crate::{MapError, MapSource, MappingBackend};
use cma_abi::Access;
use core::ffi::c_void;
use core::ptr;
use kernel_memory_addresses::{Alignment, PhysicalAddress, VirtualAddress};
use log::error;
use rustix::fs::{Mode, OFlags};
use rustix::mm::{MapFlags, ProtFlags};
use std::path::{Path, PathBuf};

/// Process-side mapping of physical memory through a memory device.
///
/// Every [`map`](MappingBackend::map) opens the device, maps the page-aligned
/// range shared read/write and closes the descriptor again; the mapping
/// outlives it. Non-cached access kinds open the device with `O_SYNC`, which
/// the kernel's memory driver maps uncached.
#[derive(Debug, Clone)]
pub struct DevMemBackend {
    path: PathBuf,
    page: Alignment,
}

impl Default for DevMemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DevMemBackend {
    pub const DEFAULT_PATH: &'static str = "/dev/mem";

    #[must_use]
    pub fn new() -> Self {
        Self::with_path(Self::DEFAULT_PATH)
    }

    /// Map through `path` instead of `/dev/mem`.
    #[must_use]
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        let page = u64::try_from(rustix::param::page_size())
            .ok()
            .and_then(Alignment::new)
            .unwrap_or(Alignment::PAGE);
        Self {
            path: path.as_ref().to_path_buf(),
            page,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page-aligned start and total length covering `[addr, addr + size)`.
    fn page_span(&self, addr: u64, size: u64) -> Result<(u64, u64, usize), MapError> {
        let aligned = self.page.align_down(addr);
        let delta = addr - aligned;
        let len = size
            .checked_add(delta)
            .and_then(|l| usize::try_from(l).ok())
            .filter(|&l| l > 0)
            .ok_or(MapError::BadLength(size))?;
        Ok((aligned, delta, len))
    }
}

impl MappingBackend for DevMemBackend {
    fn source(&self) -> MapSource {
        MapSource::User
    }

    fn map(&self, phys: PhysicalAddress, size: u64, access: Access) -> Option<VirtualAddress> {
        let (aligned, delta, len) = self
            .page_span(phys.as_u64(), size)
            .inspect_err(|e| error!("{}: cannot map {phys}: {e}", self.path.display()))
            .ok()?;

        let mut flags = OFlags::RDWR | OFlags::CLOEXEC;
        if !access.is_cached() {
            flags |= OFlags::SYNC;
        }
        let fd = rustix::fs::open(&self.path, flags, Mode::empty())
            .inspect_err(|e| error!("{}: open failed: {e}", self.path.display()))
            .ok()?;

        // SAFETY: a fresh shared mapping chosen by the kernel; it aliases no
        // Rust object.
        let base = unsafe {
            rustix::mm::mmap(
                ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                aligned,
            )
        }
        .inspect_err(|e| {
            error!(
                "{}: mmap of {phys}+0x{size:X} failed: {e}",
                self.path.display()
            );
        })
        .ok()?;
        drop(fd);

        Some(VirtualAddress::from_mut_ptr(base) + delta)
    }

    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        let (aligned, _, len) = self.page_span(va.as_u64(), size)?;
        let base: *mut c_void = VirtualAddress::new(aligned).as_mut_ptr();
        // SAFETY: the caller hands back a range produced by `map`.
        unsafe { rustix::mm::munmap(base, len) }.map_err(|e| {
            error!("{}: munmap of {va} failed: {e}", self.path.display());
            MapError::Os(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct TempFile(PathBuf);

    impl TempFile {
        fn new(tag: &str, len: u64) -> Self {
            let path = std::env::temp_dir().join(format!(
                "kernel-memmap-{tag}-{}",
                std::process::id()
            ));
            let file = fs::File::create(&path).unwrap();
            file.set_len(len).unwrap();
            Self(path)
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }

    #[test]
    fn writes_reach_the_device_at_unaligned_offsets() {
        let file = TempFile::new("rw", 0x3000);
        let backend = DevMemBackend::with_path(&file.0);
        assert_eq!(backend.source(), MapSource::User);

        let phys = PhysicalAddress::new(0x1010);
        let va = backend.map(phys, 16, Access::NonCachedBufferable).unwrap();
        unsafe {
            backend.write32(va, 0xDEAD_BEEF);
            backend.write8(va + 4, 0x42);
            assert_eq!(backend.read32(va), 0xDEAD_BEEF);
        }
        backend.unmap(va, 16).unwrap();

        let contents = fs::read(&file.0).unwrap();
        assert_eq!(&contents[0x1010..0x1014], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(contents[0x1014], 0x42);
        assert!(contents[..0x1010].iter().all(|&b| b == 0));
    }

    #[test]
    fn missing_device_yields_none() {
        let backend = DevMemBackend::with_path("/nonexistent/kernel-memmap-device");
        assert_eq!(
            backend.map(PhysicalAddress::new(0), 4096, Access::CachedWriteBack),
            None
        );
    }

    #[test]
    fn zero_length_is_rejected() {
        let backend = DevMemBackend::with_path("/dev/null");
        assert_eq!(
            backend.unmap(VirtualAddress::new(0x1000), 0),
            Err(MapError::BadLength(0))
        );
    }
}
