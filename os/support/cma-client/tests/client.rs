use cma_abi::{Access, MemoryCommand, MemoryFlags, status};
use cma_client::{ClientError, MemoryClient};
use kernel_alloc::SpaceConfig;
use kernel_cma::{MemoryManager, MemoryService};
use kernel_memmap::{DirectMapBackend, MappingBackend};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_rpc::RpcBus;
use std::sync::Arc;
use std::thread;

const BASE: u64 = 0x1000_0000;
const HALF: u64 = 0x2_0000;

/// Two chunks of 128 KiB backed by one heap buffer.
struct Fixture {
    bus: RpcBus,
    manager: Arc<MemoryManager<DirectMapBackend>>,
    backend: DirectMapBackend,
    _memory: Vec<u8>,
}

impl Fixture {
    fn new() -> Self {
        let mut memory = vec![0xAAu8; usize::try_from(2 * HALF).unwrap()];
        let backend = DirectMapBackend::at(
            VirtualAddress::from_mut_ptr(memory.as_mut_ptr()),
            PhysicalAddress::new(BASE),
            2 * HALF,
        );

        let manager = Arc::new(MemoryManager::new(backend.clone()));
        manager
            .init_space(SpaceConfig::new(0, PhysicalAddress::new(BASE), HALF, 0x1000))
            .unwrap();
        manager
            .init_space(SpaceConfig::new(1, PhysicalAddress::new(BASE + HALF), HALF, 0x1000))
            .unwrap();

        let bus = RpcBus::new();
        assert!(MemoryService::new(Arc::clone(&manager)).register(&bus).is_some());

        Self {
            bus,
            manager,
            backend,
            _memory: memory,
        }
    }

    fn client(&self, pid: u32) -> MemoryClient {
        MemoryClient::connect(&self.bus, pid, Some(Box::new(self.backend.clone()))).unwrap()
    }
}

fn contiguous() -> MemoryFlags {
    MemoryFlags::new().with_contiguous(true)
}

#[test]
fn first_fit_reuses_freed_block() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    let a = client.alloc(0x1000, contiguous()).unwrap();
    let b = client.alloc(0x1000, contiguous()).unwrap();
    assert_eq!(a.physical().as_u64(), BASE);
    assert_eq!(b.physical().as_u64(), BASE + 0x1000);

    client.free(a).unwrap();
    let c = client.alloc(0x1000, contiguous()).unwrap();
    assert_eq!(c.physical().as_u64(), BASE);

    client.free(b).unwrap();
    client.free(c).unwrap();
    assert_eq!(client.allocation_count(), Ok(0));
    assert_eq!(client.free_size(), Ok(2 * HALF));
}

#[test]
fn chunk_and_alignment_come_from_flags() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    let second = client.alloc(0x1000, contiguous().with_chunk_id(1)).unwrap();
    assert_eq!(second.physical().as_u64(), BASE + HALF);
    assert_eq!(second.chunk_id(), 1);

    let pad = client.alloc(0x1000, contiguous()).unwrap();
    assert_eq!(pad.chunk_id(), 0);
    let aligned = client.alloc(0x1000, contiguous().with_byte_alignment(16)).unwrap();
    assert_eq!(aligned.physical().as_u64() % 0x1_0000, 0);
    assert_eq!(aligned.physical().as_u64(), BASE + 0x1_0000);
}

#[test]
fn sizes_are_rounded_to_the_granule() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    let block = client.alloc(0x1801, contiguous()).unwrap();
    assert_eq!(block.size(), 0x2000);
    assert_eq!(client.size_of(block.physical()), Ok(0x2000));

    let half = client.alloc(0x800, contiguous()).unwrap();
    assert_eq!(half.size(), 0x1000);
    assert_eq!(half.physical().as_u64(), BASE + 0x2000);
    client.free(half).unwrap();
    assert_eq!(client.free_size(), Ok(2 * HALF - 0x2000));
    assert_eq!(client.total_size(), Ok(2 * HALF));
}

#[test]
fn zero_flag_clears_the_block() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    let mut block = client.alloc(0x2000, contiguous().with_zero(true)).unwrap();
    let va = client.map(&mut block, Access::CachedWriteBack).unwrap();
    assert_eq!(client.map(&mut block, Access::CachedWriteBack), Ok(va));

    for offset in [0, 1, 0xFFF, 0x1FFF] {
        assert_eq!(unsafe { fx.backend.read8(va + offset) }, 0);
    }
    // The neighbouring block was never requested zeroed.
    assert_eq!(unsafe { fx.backend.read8(va + 0x2000) }, 0xAA);

    client.unmap(&mut block, Access::CachedWriteBack).unwrap();
    assert_eq!(block.mapping(Access::CachedWriteBack), None);
    client.free(block).unwrap();
}

#[test]
fn chunk_queries() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    assert_eq!(client.devices(), Ok(0b11));
    assert_eq!(client.chunk_count(), Ok(2));
    assert_eq!(client.chunk_base(1), Ok(PhysicalAddress::new(BASE + HALF)));
    assert_eq!(client.chunk_size(0), Ok(HALF));
    assert_eq!(
        client.chunk_base(5),
        Err(ClientError::Status {
            command: MemoryCommand::GetBase,
            code: status::EINVAL
        })
    );
    assert_eq!(
        client.chunks(),
        Ok(vec![
            (0, PhysicalAddress::new(BASE), HALF),
            (1, PhysicalAddress::new(BASE + HALF), HALF),
        ])
    );
}

#[test]
fn exhaustion_and_bad_free_are_reported() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    assert_eq!(
        client.alloc(4 * HALF, contiguous()).unwrap_err(),
        ClientError::OutOfMemory(4 * HALF)
    );
    assert_eq!(
        client.size_of(PhysicalAddress::new(BASE)),
        Err(ClientError::Status {
            command: MemoryCommand::Size,
            code: status::EINVAL
        })
    );
    assert_eq!(client.allocation_count(), Ok(0));
}

#[test]
fn oversized_alignment_exponent_is_refused() {
    let fx = Fixture::new();
    let mut client = fx.client(1);

    assert_eq!(
        client.alloc(0x1000, contiguous().with_byte_alignment(64)).unwrap_err(),
        ClientError::InvalidAlignment(64)
    );
    assert_eq!(client.allocation_count(), Ok(0));
}

#[test]
fn exit_sweep_releases_only_the_owner() {
    let fx = Fixture::new();
    let mut doomed = fx.client(7);
    let mut survivor = fx.client(8);

    for _ in 0..3 {
        let _ = doomed.alloc(0x1000, contiguous()).unwrap();
    }
    let kept = survivor.alloc(0x1000, contiguous()).unwrap();
    doomed.close().unwrap();

    assert_eq!(fx.manager.release_process(7), 3);
    assert_eq!(fx.manager.release_process(7), 0);
    assert_eq!(survivor.allocation_count(), Ok(1));
    assert_eq!(fx.manager.area(kept.physical()).map(|a| a.pid), Some(8));
    survivor.free(kept).unwrap();
}

#[test]
fn missing_service_is_reported() {
    let bus = RpcBus::new();
    assert!(matches!(
        MemoryClient::connect(&bus, 1, None),
        Err(ClientError::ServiceNotFound(_))
    ));
}

#[test]
fn clients_on_many_threads() {
    let fx = Fixture::new();
    let manager = &fx.manager;

    thread::scope(|s| {
        for pid in 0..4 {
            let mut client = fx.client(pid);
            s.spawn(move || {
                for round in 0..50u64 {
                    let size = 0x1000 * (1 + (round + u64::from(pid)) % 3);
                    let block = client.alloc(size, contiguous()).unwrap();
                    assert_eq!(manager.area(block.physical()).map(|a| a.pid), Some(pid));
                    client.free(block).unwrap();
                }
            });
        }
    });

    assert_eq!(fx.manager.allocation_count(), 0);
    assert_eq!(fx.manager.memory_size_free(), 2 * HALF);
}
