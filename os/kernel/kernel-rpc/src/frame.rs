//! # Frame layout
//!
//! Every driver call travels as one request frame and comes back as one reply
//! frame. All integers are little endian.
//!
//! ```text
//! request                                   reply
//! +0   magic       u32  "RPC1"              +0   magic       u32  "RPY1"
//! +4   version     u16  = 1                 +4   version     u16  = 1
//! +6   in_count    u16                      +6   out_count   u16
//! +8   func_id     u32                      +8   return_code u32
//! +12  out_count   u16                      +12  out_count × u32 lengths
//! +14  reserved    u16  = 0                 ...  output bytes, concatenated
//! +16  in_count  × u32 input lengths
//! ...  out_count × u32 declared output lengths
//! ...  input bytes, concatenated
//! ```
//!
//! A reply may carry fewer output buffers than were declared (the service
//! did not fill them), never more.

use crate::FrameError;
use alloc::vec::Vec;

pub const REQUEST_MAGIC: u32 = u32::from_le_bytes(*b"RPC1");
pub const REPLY_MAGIC: u32 = u32::from_le_bytes(*b"RPY1");
pub const FRAME_VERSION: u16 = 1;

const REQUEST_HEADER_LEN: usize = 16;
const REPLY_HEADER_LEN: usize = 12;

/// A decoded request, borrowing its payload from the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    pub func_id: u32,
    /// Length of every input buffer, in order.
    pub input_lengths: Vec<usize>,
    /// Length the caller expects for every output buffer, in order.
    pub output_lengths: Vec<usize>,
    /// All input buffers, concatenated.
    pub input: &'a [u8],
}

/// A decoded reply, borrowing its segments from the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<'a> {
    pub return_code: u32,
    pub outputs: Vec<&'a [u8]>,
}

/// Encode a request frame.
///
/// # Errors
/// [`FrameError::TooManyBuffers`] or [`FrameError::BufferTooLarge`] when a
/// count or length does not fit the header fields.
pub fn encode_request(
    func_id: u32,
    inputs: &[&[u8]],
    output_lengths: &[usize],
) -> Result<Vec<u8>, FrameError> {
    let in_count = count_u16(inputs.len())?;
    let out_count = count_u16(output_lengths.len())?;
    let payload: usize = inputs.iter().map(|b| b.len()).sum();

    let mut out = Vec::with_capacity(
        REQUEST_HEADER_LEN + 4 * (inputs.len() + output_lengths.len()) + payload,
    );
    out.extend_from_slice(&REQUEST_MAGIC.to_le_bytes());
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.extend_from_slice(&in_count.to_le_bytes());
    out.extend_from_slice(&func_id.to_le_bytes());
    out.extend_from_slice(&out_count.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    for input in inputs {
        out.extend_from_slice(&len_u32(input.len())?.to_le_bytes());
    }
    for &len in output_lengths {
        out.extend_from_slice(&len_u32(len)?.to_le_bytes());
    }
    for input in inputs {
        out.extend_from_slice(input);
    }
    Ok(out)
}

/// Decode a request frame.
///
/// # Errors
/// Any structural problem with the frame; see [`FrameError`].
pub fn decode_request(frame: &[u8]) -> Result<Request<'_>, FrameError> {
    let mut cursor = Cursor::new(frame);
    expect_magic(cursor.u32()?, REQUEST_MAGIC)?;
    expect_version(cursor.u16()?)?;
    let in_count = usize::from(cursor.u16()?);
    let func_id = cursor.u32()?;
    let out_count = usize::from(cursor.u16()?);
    let _reserved = cursor.u16()?;

    let input_lengths = cursor.lengths(in_count)?;
    let output_lengths = cursor.lengths(out_count)?;
    let total: usize = input_lengths.iter().sum();
    let input = cursor.take(total)?;
    cursor.finish()?;

    Ok(Request {
        func_id,
        input_lengths,
        output_lengths,
        input,
    })
}

/// Encode a reply frame.
///
/// # Errors
/// [`FrameError::TooManyBuffers`] or [`FrameError::BufferTooLarge`].
pub fn encode_reply<B: AsRef<[u8]>>(
    return_code: u32,
    outputs: &[B],
) -> Result<Vec<u8>, FrameError> {
    let out_count = count_u16(outputs.len())?;
    let payload: usize = outputs.iter().map(|b| b.as_ref().len()).sum();

    let mut out = Vec::with_capacity(REPLY_HEADER_LEN + 4 * outputs.len() + payload);
    out.extend_from_slice(&REPLY_MAGIC.to_le_bytes());
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.extend_from_slice(&out_count.to_le_bytes());
    out.extend_from_slice(&return_code.to_le_bytes());
    for output in outputs {
        out.extend_from_slice(&len_u32(output.as_ref().len())?.to_le_bytes());
    }
    for output in outputs {
        out.extend_from_slice(output.as_ref());
    }
    Ok(out)
}

/// Decode a reply frame.
///
/// # Errors
/// Any structural problem with the frame; see [`FrameError`].
pub fn decode_reply(frame: &[u8]) -> Result<Reply<'_>, FrameError> {
    let mut cursor = Cursor::new(frame);
    expect_magic(cursor.u32()?, REPLY_MAGIC)?;
    expect_version(cursor.u16()?)?;
    let out_count = usize::from(cursor.u16()?);
    let return_code = cursor.u32()?;

    let lengths = cursor.lengths(out_count)?;
    let mut outputs = Vec::with_capacity(lengths.len());
    for len in lengths {
        outputs.push(cursor.take(len)?);
    }
    cursor.finish()?;

    Ok(Reply {
        return_code,
        outputs,
    })
}

const fn expect_magic(found: u32, expected: u32) -> Result<(), FrameError> {
    if found == expected {
        Ok(())
    } else {
        Err(FrameError::BadMagic(found))
    }
}

const fn expect_version(found: u16) -> Result<(), FrameError> {
    if found == FRAME_VERSION {
        Ok(())
    } else {
        Err(FrameError::UnsupportedVersion(found))
    }
}

fn count_u16(count: usize) -> Result<u16, FrameError> {
    u16::try_from(count).map_err(|_| FrameError::TooManyBuffers(count))
}

fn len_u32(len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::BufferTooLarge(len))
}

/// Bounds-checked little-endian reader.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let truncated = FrameError::Truncated {
            needed: self.pos.saturating_add(len),
            available: self.bytes.len(),
        };
        let end = self.pos.checked_add(len).ok_or_else(|| truncated.clone())?;
        let slice = self.bytes.get(self.pos..end).ok_or(truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn lengths(&mut self, count: usize) -> Result<Vec<usize>, FrameError> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.u32()? as usize);
        }
        Ok(out)
    }

    fn finish(self) -> Result<(), FrameError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            rest => Err(FrameError::TrailingBytes(rest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_layout() {
        let frame = encode_request(7, &[&[0xAA, 0xBB], &[0xCC]], &[8]).unwrap();
        assert_eq!(&frame[0..4], b"RPC1");
        assert_eq!(u16::from_le_bytes([frame[4], frame[5]]), FRAME_VERSION);
        assert_eq!(u16::from_le_bytes([frame[6], frame[7]]), 2);
        assert_eq!(u32::from_le_bytes(frame[8..12].try_into().unwrap()), 7);
        assert_eq!(u16::from_le_bytes([frame[12], frame[13]]), 1);
        // two input lengths, one output length, three payload bytes
        assert_eq!(frame.len(), 16 + 3 * 4 + 3);
        assert_eq!(&frame[frame.len() - 3..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn request_decodes_buffer_boundaries() {
        let frame = encode_request(3, &[b"abc", b"", b"de"], &[4, 8]).unwrap();
        let req = decode_request(&frame).unwrap();
        assert_eq!(req.func_id, 3);
        assert_eq!(req.input_lengths, [3, 0, 2]);
        assert_eq!(req.output_lengths, [4, 8]);
        assert_eq!(req.input, b"abcde");
    }

    #[test]
    fn reply_may_carry_fewer_outputs() {
        let frame = encode_reply::<&[u8]>(0x22, &[]).unwrap();
        let reply = decode_reply(&frame).unwrap();
        assert_eq!(reply.return_code, 0x22);
        assert!(reply.outputs.is_empty());
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let frame = encode_request(1, &[b"payload"], &[]).unwrap();
        let err = decode_request(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
        assert!(matches!(
            decode_reply(&[0u8; 3]).unwrap_err(),
            FrameError::Truncated { needed: 4, available: 3 }
        ));
    }

    #[test]
    fn wrong_magic_and_version_are_rejected() {
        let reply = encode_reply(0, &[b"x"]).unwrap();
        assert_eq!(decode_request(&reply).unwrap_err(), FrameError::BadMagic(REPLY_MAGIC));

        let mut frame = encode_request(1, &[], &[]).unwrap();
        frame[4] = 9;
        assert_eq!(decode_request(&frame).unwrap_err(), FrameError::UnsupportedVersion(9));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut frame = encode_reply(0, &[b"ok"]).unwrap();
        frame.push(0);
        assert_eq!(decode_reply(&frame).unwrap_err(), FrameError::TrailingBytes(1));
    }
}
