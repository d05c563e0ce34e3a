use kernel_memory_addresses::PhysicalAddress;

/// Static description of one address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SpaceConfig {
    pub space_id: u8,
    pub base: PhysicalAddress,
    /// Size in bytes; a non-zero multiple of `alignment`.
    pub size: u64,
    /// Allocation granule; a power of two that `base` is aligned to.
    pub alignment: u64,
    /// Chunk node pool size; defaults to `min(size / alignment, MAX_CHUNK_NODES)`.
    pub max_chunk_nodes: Option<usize>,
    /// Address node pool size; defaults to `min(size / alignment, MAX_ADDR_NODES)`.
    pub max_addr_nodes: Option<usize>,
}

impl SpaceConfig {
    #[must_use]
    pub const fn new(space_id: u8, base: PhysicalAddress, size: u64, alignment: u64) -> Self {
        Self {
            space_id,
            base,
            size,
            alignment,
            max_chunk_nodes: None,
            max_addr_nodes: None,
        }
    }

    /// Override both node pool sizes.
    #[must_use]
    pub const fn with_node_limits(mut self, chunks: usize, addrs: usize) -> Self {
        self.max_chunk_nodes = Some(chunks);
        self.max_addr_nodes = Some(addrs);
        self
    }

    /// First byte past the space.
    #[must_use]
    pub const fn end(&self) -> Option<PhysicalAddress> {
        self.base.checked_add(self.size)
    }
}
