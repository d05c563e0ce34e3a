//! # Physical Memory Mapping
//!
//! Turns physical addresses of contiguous allocations into something the
//! current context can dereference, and back.
//!
//! ## Why is this needed?
//! - The allocator only hands out bus addresses; CPUs can only dereference
//!   virtual ones.
//! - The kernel reaches physical memory through its direct map, while a
//!   process has to map `/dev/mem`. Both sides run the same manager and
//!   client code, so the strategy sits behind [`MappingBackend`].
//!
//! ## Backends
//! - [`DirectMapBackend`]: fixed-offset translation over a physical window,
//!   the way a higher-half direct map works. Mapping and unmapping are free.
//! - `DevMemBackend` (feature `devmem`): `mmap` of the memory device.
//!
//! Failures are logged and reported as `None` from [`MappingBackend::map`]
//! or as [`MapError`] from [`MappingBackend::unmap`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "devmem")]
extern crate std;

mod backend;
#[cfg(feature = "devmem")]
mod devmem;
mod direct;

pub use backend::{MapError, MapSource, MappingBackend};
#[cfg(feature = "devmem")]
pub use devmem::DevMemBackend;
pub use direct::DirectMapBackend;
