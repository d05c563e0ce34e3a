//! Runs the contiguous memory manager against a heap buffer standing in for
//! a reserved carve-out and exercises it through the client API.
//!
//! ```text
//! cma-demo [chunk-kib] [log-level]
//! ```

mod logger;

use cma_abi::{Access, MemoryFlags};
use cma_client::MemoryClient;
use kernel_alloc::SpaceConfig;
use kernel_cma::{MemoryManager, MemoryService};
use kernel_memmap::{DirectMapBackend, MappingBackend};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_rpc::RpcBus;
use log::{LevelFilter, error, info};
use logger::StderrLogger;
use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

/// Where the simulated carve-out pretends to live on the bus.
const CARVE_OUT_BASE: u64 = 0x1000_0000;
const GRANULE: u64 = 0x1000;
const CLIENT_PID: u32 = 100;

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let chunk_kib = match args.next().map(|a| a.parse::<u64>()) {
        None => 256,
        Some(Ok(kib)) if kib >= 4 && kib % 4 == 0 => kib,
        Some(_) => {
            eprintln!("usage: cma-demo [chunk-kib (multiple of 4)] [error|warn|info|debug|trace]");
            return ExitCode::FAILURE;
        }
    };
    let level = args
        .next()
        .and_then(|l| l.parse().ok())
        .unwrap_or(LevelFilter::Info);
    if StderrLogger::new(level).init().is_err() {
        eprintln!("logger already installed");
    }

    match run(chunk_kib * 1024) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("demo failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(chunk_size: u64) -> Result<(), Box<dyn Error>> {
    let total = 2 * chunk_size;
    let mut memory = vec![0xA5u8; usize::try_from(total)?];
    let backend = DirectMapBackend::at(
        VirtualAddress::from_mut_ptr(memory.as_mut_ptr()),
        PhysicalAddress::new(CARVE_OUT_BASE),
        total,
    );

    let manager = Arc::new(MemoryManager::new(backend.clone()));
    for id in 0..2u8 {
        let base = PhysicalAddress::new(CARVE_OUT_BASE + u64::from(id) * chunk_size);
        manager.init_space(SpaceConfig::new(id, base, chunk_size, GRANULE))?;
    }

    let bus = RpcBus::new();
    let service = MemoryService::new(Arc::clone(&manager))
        .register(&bus)
        .ok_or("memory service already registered")?;

    let mut client = MemoryClient::connect(&bus, CLIENT_PID, Some(Box::new(backend.clone())))?;
    for (id, base, size) in client.chunks()? {
        println!("chunk {id}: {base} + 0x{size:X}");
    }

    let flags = MemoryFlags::new().with_contiguous(true);
    let small = client.alloc(0x1800, flags)?;
    let page = client.alloc(0x4000, flags.with_page_alignment().with_zero(true))?;
    let far = client.alloc(0x1000, flags.with_chunk_id(1))?;
    for block in [&small, &page, &far] {
        println!(
            "block {} size 0x{:X} (rounded 0x{:X})",
            block.physical(),
            block.size(),
            client.size_of(block.physical())?
        );
    }

    let mut page = page;
    let va = client.map(&mut page, Access::CachedWriteBack)?;
    // SAFETY: the block is 0x4000 bytes, mapped and owned by this client.
    let readback = unsafe {
        backend.write32(va + 0x10, 0xC0FF_EE00);
        backend.read32(va + 0x10)
    };
    println!("mapped {} at {va:?}, wrote and read 0x{readback:08X}", page.physical());
    client.unmap(&mut page, Access::CachedWriteBack)?;

    println!(
        "{} allocations, 0x{:X} of 0x{:X} bytes free, devices 0b{:b}",
        client.allocation_count()?,
        client.free_size()?,
        client.total_size()?,
        client.devices()?
    );

    client.free(small)?;
    client.free(page)?;
    // `far` is never freed; the exit sweep reclaims it.
    client.close()?;

    let swept = manager.release_process(CLIENT_PID);
    info!("exit sweep of pid {CLIENT_PID} released {swept} allocations");

    if !bus.unregister_service(service) {
        error!("memory service vanished before shutdown");
    }
    let leaked = manager.shutdown();
    println!("released {swept} on exit, {leaked} at shutdown");
    drop(manager);
    drop(memory);
    Ok(())
}
