use crate::MemoryFlags;
use wire_abi::Wire;

/// Argument and result of [`MemoryCommand::Alloc`](crate::MemoryCommand::Alloc).
///
/// On success the reply carries the block address, its size rounded to the
/// chunk granule, and the chunk that holds it.
///
/// ```text
/// +0   size              u64   in: requested; out: rounded
/// +8   align             u64   0 = space default
/// +16  ret_phys_pointer  u64   out; 0 on failure
/// +24  chunk_id          u8    in: ANY_CHUNK = first chunk with room; out: chosen
/// +25  reserved          [u8; 3]
/// +28  flags             u32   MemoryFlags
/// ```
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct AllocRequest {
    pub size: u64,
    pub align: u64,
    pub ret_phys_pointer: u64,
    pub chunk_id: u8,
    pub flags: MemoryFlags,
}

impl AllocRequest {
    #[must_use]
    pub const fn new(size: u64, align: u64, chunk_id: u8, flags: MemoryFlags) -> Self {
        Self {
            size,
            align,
            ret_phys_pointer: 0,
            chunk_id,
            flags,
        }
    }
}

impl Wire for AllocRequest {
    const WIRE_SIZE: usize = 32;

    fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..16].copy_from_slice(&self.align.to_le_bytes());
        out[16..24].copy_from_slice(&self.ret_phys_pointer.to_le_bytes());
        out[24] = self.chunk_id;
        out[25..28].fill(0);
        out[28..32].copy_from_slice(&self.flags.into_bits().to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::WIRE_SIZE] = bytes.try_into().ok()?;
        let u64_at = |at: usize| u64::read_from(&bytes[at..at + 8]);
        Some(Self {
            size: u64_at(0)?,
            align: u64_at(8)?,
            ret_phys_pointer: u64_at(16)?,
            chunk_id: bytes[24],
            flags: MemoryFlags::from_bits(u32::read_from(&bytes[28..32])?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_fixed() {
        let req = AllocRequest {
            size: 0x1122,
            align: 0x40,
            ret_phys_pointer: 0x1000_0000,
            chunk_id: 3,
            flags: MemoryFlags::new().with_zero(true),
        };
        let bytes = req.to_wire();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..2], &[0x22, 0x11]);
        assert_eq!(bytes[8], 0x40);
        assert_eq!(&bytes[16..24], &0x1000_0000u64.to_le_bytes());
        assert_eq!(bytes[24], 3);
        assert_eq!(&bytes[25..28], &[0, 0, 0]);
        assert_eq!(&bytes[28..32], &[0x04, 0, 0, 0]);
        assert_eq!(AllocRequest::read_from(&bytes), Some(req));
    }

    #[test]
    fn short_input_is_rejected() {
        assert_eq!(AllocRequest::read_from(&[0; 31]), None);
    }
}
