use cma_abi::Access;
use kernel_alloc::{AllocError, SpaceConfig};
use kernel_cma::{CmaError, MemoryManager, RegistryError};
use kernel_memmap::{DirectMapBackend, MapError, MapSource, MappingBackend};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

const BASE: u64 = 0x2000_0000;
const SIZE: u64 = 0x8_0000;

/// Direct map over a heap buffer that counts live mappings.
struct Counting {
    inner: DirectMapBackend,
    live: AtomicUsize,
}

impl MappingBackend for Counting {
    fn source(&self) -> MapSource {
        MapSource::Kernel
    }

    fn map(&self, phys: PhysicalAddress, size: u64, access: Access) -> Option<VirtualAddress> {
        let va = self.inner.map(phys, size, access)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(va)
    }

    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        self.inner.unmap(va, size)?;
        self.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Direct map that counts calls made while the manager lock was held.
struct Observing {
    inner: DirectMapBackend,
    manager: OnceLock<Weak<MemoryManager<Observing>>>,
    calls: AtomicUsize,
    locked_calls: AtomicUsize,
}

impl Observing {
    fn observe(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(manager) = self.manager.get().and_then(Weak::upgrade)
            && manager.is_locked()
        {
            self.locked_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl MappingBackend for Observing {
    fn source(&self) -> MapSource {
        MapSource::Kernel
    }

    fn map(&self, phys: PhysicalAddress, size: u64, access: Access) -> Option<VirtualAddress> {
        self.observe();
        self.inner.map(phys, size, access)
    }

    fn unmap(&self, va: VirtualAddress, size: u64) -> Result<(), MapError> {
        self.observe();
        self.inner.unmap(va, size)
    }
}

fn manager(memory: &mut [u8]) -> MemoryManager<Counting> {
    let inner = DirectMapBackend::at(
        VirtualAddress::from_mut_ptr(memory.as_mut_ptr()),
        PhysicalAddress::new(BASE),
        SIZE,
    );
    let manager = MemoryManager::new(Counting {
        inner,
        live: AtomicUsize::new(0),
    });
    manager
        .init_space(SpaceConfig::new(0, PhysicalAddress::new(BASE), SIZE, 0x1000))
        .unwrap();
    manager
}

fn memory() -> Vec<u8> {
    vec![0x5Au8; usize::try_from(SIZE).unwrap()]
}

#[test]
fn free_tears_down_every_alias() {
    let mut memory = memory();
    let manager = manager(&mut memory);
    let phys = manager.alloc(0x3000, 0, None, 1).unwrap();

    for access in Access::MAPPINGS {
        manager.map(phys, access).unwrap();
    }
    assert_eq!(manager.backend().live.load(Ordering::SeqCst), 4);

    assert_eq!(manager.free(phys), Ok(0x3000));
    assert_eq!(manager.backend().live.load(Ordering::SeqCst), 0);
    assert_eq!(manager.free(phys), Err(CmaError::Registry(RegistryError::NotRegistered(phys))));
}

#[test]
fn release_process_unmaps_and_frees() {
    let mut memory = memory();
    let manager = manager(&mut memory);
    let mine = manager.alloc(0x1000, 0, None, 5).unwrap();
    let theirs = manager.alloc(0x1000, 0, None, 6).unwrap();
    manager.map(mine, Access::CachedWriteBack).unwrap();
    manager.map(theirs, Access::NonCachedBufferable).unwrap();

    assert_eq!(manager.release_process(5), 1);
    assert_eq!(manager.backend().live.load(Ordering::SeqCst), 1);
    assert!(manager.area(mine).is_none());
    assert_eq!(manager.area(theirs).map(|a| a.pid), Some(6));

    assert_eq!(manager.shutdown(), 1);
    assert_eq!(manager.backend().live.load(Ordering::SeqCst), 0);
    assert_eq!(manager.chunk_count(), 0);
}

#[test]
fn zero_clears_exactly_the_range() {
    let mut memory = memory();
    let manager = manager(&mut memory);
    let phys = manager.alloc(0x1000, 0, None, 1).unwrap();

    manager.zero(phys, 0x1000).unwrap();
    assert_eq!(manager.backend().live.load(Ordering::SeqCst), 0);
    drop(manager);

    assert!(memory[..0x1000].iter().all(|&b| b == 0));
    assert_eq!(memory[0x1000], 0x5A);
}

#[test]
fn zero_outside_window_fails() {
    let mut memory = memory();
    let manager = manager(&mut memory);
    let outside = PhysicalAddress::new(BASE + SIZE);
    assert_eq!(
        manager.zero(outside, 0x1000),
        Err(CmaError::MapFailed {
            phys: outside,
            access: Access::NonCachedNonBufferable
        })
    );
}

#[test]
fn explicit_chunk_errors_are_passed_through() {
    let mut memory = memory();
    let manager = manager(&mut memory);
    assert_eq!(
        manager.alloc(0x1000, 3, Some(0), 1),
        Err(CmaError::Alloc(AllocError::InvalidAlignment(3)))
    );
    assert_eq!(
        manager.alloc(SIZE + 0x1000, 0, Some(0), 1),
        Err(CmaError::Alloc(AllocError::NoFit {
            size: SIZE + 0x1000,
            align: 0x1000
        }))
    );
}

#[test]
fn concurrent_owners_keep_the_books_balanced() {
    let mut memory = memory();
    let manager = manager(&mut memory);

    thread::scope(|s| {
        for pid in 1..=4u32 {
            let manager = &manager;
            s.spawn(move || {
                let mut live = BTreeSet::new();
                let mut state = u64::from(pid) * 0x9E37_79B9;
                for _ in 0..200 {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    if state % 3 == 0
                        && let Some(phys) = live.pop_first()
                    {
                        manager.free(phys).unwrap();
                    } else if let Ok(phys) = manager.alloc(0x1000 * (1 + state % 4), 0, None, pid) {
                        assert_eq!(manager.area(phys).map(|a| a.pid), Some(pid));
                        live.insert(phys);
                    }
                }
                // Leave the rest for the exit sweep.
                assert_eq!(manager.release_process(pid), live.len());
            });
        }
    });

    assert_eq!(manager.allocation_count(), 0);
    assert_eq!(manager.free_size(0), Some(SIZE));
}

#[test]
fn backend_never_runs_under_the_lock() {
    let mut memory = memory();
    let manager = Arc::new(MemoryManager::new(Observing {
        inner: DirectMapBackend::at(
            VirtualAddress::from_mut_ptr(memory.as_mut_ptr()),
            PhysicalAddress::new(BASE),
            SIZE,
        ),
        manager: OnceLock::new(),
        calls: AtomicUsize::new(0),
        locked_calls: AtomicUsize::new(0),
    }));
    manager.backend().manager.set(Arc::downgrade(&manager)).unwrap();
    manager
        .init_space(SpaceConfig::new(0, PhysicalAddress::new(BASE), SIZE, 0x1000))
        .unwrap();

    let phys = manager.alloc(0x2000, 0, None, 9).unwrap();
    for access in Access::MAPPINGS {
        manager.map(phys, access).unwrap();
    }
    manager.unmap(phys, Access::CachedWriteBack).unwrap();
    manager.zero(phys, 0x2000).unwrap();
    manager.free(phys).unwrap();

    let kept = manager.alloc(0x1000, 0, None, 9).unwrap();
    manager.map(kept, Access::CachedWriteThrough).unwrap();
    assert_eq!(manager.release_process(9), 1);

    let last = manager.alloc(0x1000, 0, None, 10).unwrap();
    manager.map(last, Access::NonCachedBufferable).unwrap();
    assert_eq!(manager.shutdown(), 1);

    // 4 + 1 + 2 + 3 + 2 + 2 backend calls
    assert_eq!(manager.backend().calls.load(Ordering::SeqCst), 14);
    assert_eq!(manager.backend().locked_calls.load(Ordering::SeqCst), 0);
}
