use crate::frame;
use crate::{ClientPid, Transport, TransportError, Wire};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use log::error;

/// An open connection to one driver service.
///
/// Calls take `&mut self`: a handle has at most one call outstanding. Open
/// several handles for concurrent calls.
pub struct DriverHandle {
    name: String,
    client: ClientPid,
    transport: Option<Arc<dyn Transport>>,
}

impl core::fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl DriverHandle {
    /// Wrap an already connected transport.
    #[must_use]
    pub fn new(name: &str, client: ClientPid, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            client,
            transport: Some(transport),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn client_pid(&self) -> ClientPid {
        self.client
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Close the handle.
    ///
    /// # Errors
    /// [`TransportError::Closed`] if the handle was already closed.
    pub fn close(&mut self) -> Result<(), TransportError> {
        self.transport.take().map(drop).ok_or(TransportError::Closed)
    }

    /// Invoke `func_id` with ordered `inputs`, receiving into ordered `outputs`.
    ///
    /// Each output buffer's length is declared to the service, which must
    /// reply with exactly that many bytes. Outputs the service does not fill
    /// are left untouched.
    ///
    /// # Errors
    /// Transport failures only; the service's result is the returned `u32`.
    pub fn call(
        &mut self,
        func_id: u32,
        inputs: &[&[u8]],
        outputs: &mut [&mut [u8]],
    ) -> Result<u32, TransportError> {
        let declared: Vec<usize> = outputs.iter().map(|o| o.len()).collect();
        let (code, segments) = self.round_trip(func_id, inputs, &declared)?;
        for (segment, out) in segments.iter().zip(outputs.iter_mut()) {
            out.copy_from_slice(segment);
        }
        Ok(code)
    }

    /// Send one request and validate the reply against the declared outputs.
    fn round_trip(
        &self,
        func_id: u32,
        inputs: &[&[u8]],
        declared: &[usize],
    ) -> Result<(u32, Vec<Vec<u8>>), TransportError> {
        let transport = self.transport.as_ref().ok_or(TransportError::Closed)?;

        let request = frame::encode_request(func_id, inputs, declared)?;
        let reply_frame = transport.transact(self.client, &request).inspect_err(|e| {
            error!("{}: call {func_id} failed: {e}", self.name);
        })?;
        let reply = frame::decode_reply(&reply_frame)?;

        if reply.outputs.len() > declared.len() {
            return Err(TransportError::TooManyReplies {
                declared: declared.len(),
                actual: reply.outputs.len(),
            });
        }
        for (index, (segment, &expected)) in reply.outputs.iter().zip(declared).enumerate() {
            if segment.len() != expected {
                return Err(TransportError::ReplyMismatch {
                    index,
                    expected,
                    actual: segment.len(),
                });
            }
        }

        let segments = reply.outputs.iter().map(|s| s.to_vec()).collect();
        Ok((reply.return_code, segments))
    }

    /// Call without arguments.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_none(&mut self, func_id: u32) -> Result<u32, TransportError> {
        self.call(func_id, &[], &mut [])
    }

    /// Call with a single input buffer.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_in(&mut self, func_id: u32, input: &[u8]) -> Result<u32, TransportError> {
        self.call(func_id, &[input], &mut [])
    }

    /// Call with a single output buffer.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_out(&mut self, func_id: u32, output: &mut [u8]) -> Result<u32, TransportError> {
        self.call(func_id, &[], &mut [output])
    }

    /// Call with one buffer used both as input and as output.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_inout(&mut self, func_id: u32, buffer: &mut [u8]) -> Result<u32, TransportError> {
        let input = buffer.to_vec();
        self.call(func_id, &[input.as_slice()], &mut [buffer])
    }

    /// Call with one input and one output buffer.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_in_out(
        &mut self,
        func_id: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<u32, TransportError> {
        self.call(func_id, &[input], &mut [output])
    }

    /// Pass `value` by value; if the service replies, `value` is overwritten
    /// with the reply.
    ///
    /// # Errors
    /// See [`call`](Self::call). A reply that does not decode as `T` is a
    /// [`TransportError::ReplyMismatch`].
    pub fn call_struct<T: Wire>(
        &mut self,
        func_id: u32,
        value: &mut T,
    ) -> Result<u32, TransportError> {
        let mut buffer = vec![0u8; T::WIRE_SIZE];
        value.write_to(&mut buffer);
        let input = buffer.clone();

        // The service either fills the buffer completely or not at all, so
        // an untouched buffer decodes back to the original value.
        let code = self.call(func_id, &[input.as_slice()], &mut [buffer.as_mut_slice()])?;
        *value = T::read_from(&buffer).ok_or(TransportError::ReplyMismatch {
            index: 0,
            expected: T::WIRE_SIZE,
            actual: buffer.len(),
        })?;
        Ok(code)
    }

    /// Call with an optional [`Wire`] input and a single [`Wire`] reply.
    ///
    /// Returns the return code and the decoded reply, `None` if the service
    /// did not reply.
    ///
    /// # Errors
    /// See [`call`](Self::call).
    pub fn call_value<I: Wire, O: Wire>(
        &mut self,
        func_id: u32,
        input: Option<&I>,
    ) -> Result<(u32, Option<O>), TransportError> {
        let encoded = input.map(Wire::to_wire);
        let inputs: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();

        let (code, segments) = self.round_trip(func_id, &inputs, &[O::WIRE_SIZE])?;
        let value = match segments.first() {
            None => None,
            Some(segment) => Some(O::read_from(segment).ok_or(TransportError::ReplyMismatch {
                index: 0,
                expected: O::WIRE_SIZE,
                actual: segment.len(),
            })?),
        };
        Ok((code, value))
    }
}
