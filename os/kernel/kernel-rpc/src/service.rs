use crate::frame::{self, Request};
use crate::{ClientPid, DriverHandle, ReplyError, TransportError, Wire};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_sync::SpinLock;
use log::{debug, warn};

/// Service entry point: `(dispatcher, function id, concatenated input) -> return code`.
///
/// Whatever context the service needs is captured by the closure.
pub type DispatchFn = dyn Fn(&mut Dispatcher<'_>, u32, &[u8]) -> u32 + Send + Sync;

/// Moves one request frame to a service and its reply frame back.
pub trait Transport: Send + Sync {
    /// Perform one blocking call on behalf of `client`.
    ///
    /// # Errors
    /// Transport-level failures only; the service's return code travels
    /// inside the reply frame.
    fn transact(&self, client: ClientPid, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

struct ServiceEntry {
    name: String,
    id: u64,
    active: AtomicBool,
    dispatch: Box<DispatchFn>,
}

/// Proof of a successful [`RpcBus::register_service`].
///
/// Dropping it leaves the service registered; hand it back to
/// [`RpcBus::unregister_service`] to remove the service.
#[derive(Debug)]
#[must_use]
pub struct ServiceHandle {
    name: String,
    id: u64,
}

impl ServiceHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Table of named services.
///
/// The table lock is held only for lookups and updates, never across a
/// dispatch, so services may be called concurrently.
pub struct RpcBus {
    services: SpinLock<BTreeMap<String, Arc<ServiceEntry>>>,
    next_id: AtomicU64,
}

impl Default for RpcBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcBus {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            services: SpinLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `dispatch` under `name`.
    ///
    /// Returns `None` (and logs) if the name is already taken.
    pub fn register_service<F>(&self, name: &str, dispatch: F) -> Option<ServiceHandle>
    where
        F: Fn(&mut Dispatcher<'_>, u32, &[u8]) -> u32 + Send + Sync + 'static,
    {
        let mut services = self.services.lock();
        if services.contains_key(name) {
            warn!("service {name:?} is already registered");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(ServiceEntry {
            name: name.to_string(),
            id,
            active: AtomicBool::new(true),
            dispatch: Box::new(dispatch),
        });
        services.insert(name.to_string(), entry);
        debug!("registered service {name:?} (#{id})");

        Some(ServiceHandle {
            name: name.to_string(),
            id,
        })
    }

    /// Remove a service.
    ///
    /// Calls already executing finish normally; later calls through
    /// handles opened earlier fail with [`TransportError::ServiceUnavailable`].
    /// Returns `false` if the handle no longer names a registered service.
    #[allow(clippy::needless_pass_by_value)]
    pub fn unregister_service(&self, handle: ServiceHandle) -> bool {
        let mut services = self.services.lock();
        match services.get(&handle.name) {
            Some(entry) if entry.id == handle.id => {
                entry.active.store(false, Ordering::Release);
                services.remove(&handle.name);
                debug!("unregistered service {:?} (#{})", handle.name, handle.id);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.services.with_lock(|s| s.contains_key(name))
    }

    /// Open a handle to the service `name` on behalf of process `client`.
    ///
    /// Returns `None` (and logs) if no such service exists.
    #[must_use]
    pub fn open_driver(&self, name: &str, client: ClientPid) -> Option<DriverHandle> {
        let entry = self.services.with_lock(|s| s.get(name).cloned());
        let Some(entry) = entry else {
            warn!("cannot open driver {name:?}: no such service");
            return None;
        };
        let endpoint: Arc<dyn Transport> = Arc::new(LoopbackEndpoint { entry });
        Some(DriverHandle::new(name, client, endpoint))
    }
}

/// In-process transport: runs the service's dispatch function on the
/// caller's thread, exactly like a blocking write into a character device.
pub struct LoopbackEndpoint {
    entry: Arc<ServiceEntry>,
}

impl Transport for LoopbackEndpoint {
    fn transact(&self, client: ClientPid, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        if !self.entry.active.load(Ordering::Acquire) {
            return Err(TransportError::ServiceUnavailable(self.entry.name.clone()));
        }

        let Request {
            func_id,
            input_lengths,
            output_lengths,
            input,
        } = frame::decode_request(request)?;

        let mut dispatcher = Dispatcher::new(client, &input_lengths, &output_lengths);
        let code = (self.entry.dispatch)(&mut dispatcher, func_id, input);
        debug!(
            "{}: func {func_id} from pid {client} -> {code} ({} of {} outputs)",
            self.entry.name,
            dispatcher.replies.len(),
            output_lengths.len()
        );

        Ok(frame::encode_reply(code, &dispatcher.replies)?)
    }
}

/// Per-call context handed to a dispatch function.
pub struct Dispatcher<'a> {
    client: ClientPid,
    input_lengths: &'a [usize],
    output_lengths: &'a [usize],
    replies: Vec<Vec<u8>>,
}

impl<'a> Dispatcher<'a> {
    /// A context for one call; transports build these, services only use them.
    #[must_use]
    pub const fn new(
        client: ClientPid,
        input_lengths: &'a [usize],
        output_lengths: &'a [usize],
    ) -> Self {
        Self {
            client,
            input_lengths,
            output_lengths,
            replies: Vec::new(),
        }
    }

    /// The process that issued the call.
    #[must_use]
    pub const fn client_pid(&self) -> ClientPid {
        self.client
    }

    /// Lengths of the caller's input buffers, in order.
    #[must_use]
    pub const fn input_lengths(&self) -> &[usize] {
        self.input_lengths
    }

    /// Lengths of the caller's output buffers, in order.
    #[must_use]
    pub const fn output_lengths(&self) -> &[usize] {
        self.output_lengths
    }

    /// Number of declared output buffers not yet filled.
    #[must_use]
    pub fn remaining_outputs(&self) -> usize {
        self.output_lengths.len() - self.replies.len()
    }

    /// Fill the next declared output buffer with `bytes`.
    ///
    /// # Errors
    /// [`ReplyError::NoOutputSlot`] once every declared buffer is filled,
    /// [`ReplyError::SizeMismatch`] if `bytes` is not exactly as long as the
    /// buffer the caller declared.
    pub fn append_reply(&mut self, bytes: &[u8]) -> Result<(), ReplyError> {
        let index = self.replies.len();
        let Some(&expected) = self.output_lengths.get(index) else {
            return Err(ReplyError::NoOutputSlot {
                declared: self.output_lengths.len(),
            });
        };
        if bytes.len() != expected {
            return Err(ReplyError::SizeMismatch {
                index,
                expected,
                actual: bytes.len(),
            });
        }
        self.replies.push(bytes.to_vec());
        Ok(())
    }

    /// [`append_reply`](Self::append_reply) for a [`Wire`] value.
    ///
    /// # Errors
    /// See [`append_reply`](Self::append_reply).
    pub fn append_value<T: Wire>(&mut self, value: &T) -> Result<(), ReplyError> {
        self.append_reply(&value.to_wire())
    }

    /// The replies appended so far.
    #[must_use]
    pub fn replies(&self) -> &[Vec<u8>] {
        &self.replies
    }
}
