//! # Contiguous Physical Range Allocation
//!
//! Carves up to [`MAX_SPACES`] fixed physical ranges ("address spaces",
//! also called chunks by clients) into aligned, contiguous allocations.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              AddressSpaceAllocator                  │
//! │    • one slot per space id (0..MAX_SPACES)          │
//! │    • configuration validation                       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                 AddressSpace                        │
//! │    • chunk list partitioning [base, base + size)    │
//! │    • per chunk: address node list                   │
//! │    • first fit, split on allocate, merge on free    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                   NodePool                          │
//! │    • fixed-capacity arenas, index links             │
//! │    • reserved at init, never grown                  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Allocation Policy
//!
//! - Request sizes are rounded up to the space granule; the effective
//!   alignment is the stricter of the requested one and the granule.
//! - The first free address node in ascending address order that can hold
//!   the aligned request wins. It is split into optional free padding, the
//!   allocation, and an optional free tail.
//! - When the winning node is a wholly free chunk, the chunk is cut right
//!   after the allocation so the untouched remainder stays one free chunk.
//! - Freeing merges the node with free neighbours. Free space at a chunk
//!   edge joins free space across that edge: a wholly free neighbour chunk
//!   takes it over, otherwise the neighbour's free edge node moves across.
//!   No two free ranges are ever adjacent, so a request fails with
//!   [`AllocError::NoFit`] only when no contiguous free range can hold it.
//!
//! Node storage never grows after [`AddressSpaceAllocator::init`], so
//! allocation and free never touch the kernel heap. Running out of nodes is
//! reported as [`AllocError::OutOfNodes`], distinct from
//! [`AllocError::NoFit`].
//!
//! ## Example
//!
//! ```rust
//! # use kernel_alloc::{AddressSpaceAllocator, SpaceConfig};
//! # use kernel_memory_addresses::PhysicalAddress;
//! let mut alloc = AddressSpaceAllocator::new();
//! alloc
//!     .init(SpaceConfig::new(0, PhysicalAddress::new(0x1000_0000), 0x10000, 0x1000))
//!     .unwrap();
//!
//! let a = alloc.allocate(0, 0x1000, 0).unwrap();
//! let b = alloc.allocate(0, 0x1000, 0).unwrap();
//! assert_eq!(a.as_u64(), 0x1000_0000);
//! assert_eq!(b.as_u64(), 0x1000_1000);
//!
//! alloc.free(0, a).unwrap();
//! assert_eq!(alloc.allocate(0, 0x1000, 0).unwrap(), a);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod allocator;
mod config;
mod error;
mod pool;
mod space;

pub use allocator::AddressSpaceAllocator;
pub use cma_abi::limits::MAX_SPACES;
pub use config::SpaceConfig;
pub use error::{AllocError, NodeKind};
pub use space::{AddressSpace, ChunkInfo, NodeInfo};
