//! # Contiguous Memory Manager
//!
//! Hands out physically contiguous, aligned blocks from configured carve-out
//! regions and remembers which process owns each of them.
//!
//! ```text
//!   client ──call──► RpcBus ──► MemoryService ──► MemoryManager
//!                                                   │
//!                          ┌────────────────────────┼──────────────────┐
//!                          ▼                        ▼                  ▼
//!               AddressSpaceAllocator         ChunkRegistry      MappingBackend
//!               (where is free memory)    (who owns what, aliases) (make it reachable)
//! ```
//!
//! ## Ownership
//! Every live allocation has exactly one [`MemArea`](cma_abi::MemArea) in the
//! [`ChunkRegistry`], stored in the slot of its start address. When a
//! process goes away, [`MemoryManager::release_process`] sweeps the registry,
//! unmaps every alias and returns the memory to the allocator.
//!
//! ## Locking
//! The allocator and the registry live behind one ticket lock so that an
//! allocation is either fully committed or not visible at all. Node pools
//! and slot tables are sized at [`MemoryManager::init_space`] and built
//! before the lock is taken.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod error;
mod manager;
mod registry;
pub mod service;

pub use error::{CmaError, RegistryError};
pub use manager::MemoryManager;
pub use registry::{ChunkRegistry, SlotTable};
pub use service::MemoryService;
