//! # Synchronous driver calls
//!
//! A small remote-call layer between user-space clients and kernel-resident
//! driver services.
//!
//! ```text
//!  client                                   kernel
//!  ┌────────────────────┐   request frame   ┌────────────────────────────┐
//!  │ DriverHandle::call │ ────────────────▶ │ Transport (loopback, ...)  │
//!  │  inputs / outputs  │                   │   └─▶ service dispatch fn  │
//!  │                    │ ◀──────────────── │        Dispatcher::append_ │
//!  └────────────────────┘    reply frame    │        reply(..) per output│
//!                                           └────────────────────────────┘
//! ```
//!
//! - Services are registered by name on an [`RpcBus`] and receive
//!   `(dispatcher, function id, input bytes)`; they answer with a `u32`
//!   return code whose meaning is service defined.
//! - Output buffers are declared by the caller. The service fills them in
//!   order through [`Dispatcher::append_reply`]; each reply must match its
//!   declared length exactly.
//! - Calls block the caller until the dispatch function returns. There is no
//!   timeout and no cancellation.
//!
//! The wire format is described in [`frame`].

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod client;
mod error;
pub mod frame;
mod service;

pub use client::DriverHandle;
pub use error::{FrameError, ReplyError, TransportError};
pub use service::{DispatchFn, Dispatcher, LoopbackEndpoint, RpcBus, ServiceHandle, Transport};
pub use wire_abi::Wire;

/// Process identifier of the calling client as seen by the service.
pub type ClientPid = u32;
