//! # Contiguous memory ABI
//!
//! Types and constants shared by the kernel-side memory manager and its
//! user-space clients. Everything here is either `#[repr(C)]` with a checked
//! layout or encoded explicitly through [`Wire`](wire_abi::Wire).

#![cfg_attr(not(any(test, doctest)), no_std)]

mod area;
mod command;
mod flags;
pub mod limits;
mod request;

pub use area::{Access, MemArea};
pub use command::{CHUNK_DESCRIPTOR_SIZE, CHUNK_TABLE_SIZE, MemoryCommand, status};
pub use flags::MemoryFlags;
pub use request::AllocRequest;

/// Name under which the memory service registers itself.
pub const MEMORY_SERVICE_NAME: &str = "oal_cached";

/// [`AllocRequest::chunk_id`] value that lets the manager pick the first
/// configured chunk with room.
pub const ANY_CHUNK: u8 = u8::MAX;
