use crate::pool::{NodeId, NodePool};
use crate::{AllocError, NodeKind, SpaceConfig};
use alloc::vec::Vec;
use cma_abi::limits::{MAX_ADDR_NODES, MAX_CHUNK_NODES};
use kernel_memory_addresses::{Alignment, PhysicalAddress};

/// One range inside a chunk, either allocated or free.
#[derive(Debug, Clone)]
pub(crate) struct AddrNode {
    addr: u64,
    size: u64,
    allocated: bool,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl AddrNode {
    const fn free(addr: u64, size: u64) -> Self {
        Self {
            addr,
            size,
            allocated: false,
            prev: None,
            next: None,
        }
    }

    const fn end(&self) -> u64 {
        self.addr + self.size
    }
}

/// A contiguous run of the space whose address nodes partition it exactly.
///
/// A chunk is free iff its list is a single free node spanning the chunk.
#[derive(Debug, Clone)]
pub(crate) struct ChunkNode {
    addr: u64,
    size: u64,
    is_free: bool,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    /// First address node of this chunk.
    nodes: NodeId,
}

impl ChunkNode {
    const fn end(&self) -> u64 {
        self.addr + self.size
    }
}

/// Read-only view of an address node.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NodeInfo {
    pub addr: PhysicalAddress,
    pub size: u64,
    pub allocated: bool,
}

/// Read-only view of a chunk and its address nodes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ChunkInfo {
    pub addr: PhysicalAddress,
    pub size: u64,
    pub is_free: bool,
    pub nodes: Vec<NodeInfo>,
}

/// A single managed physical range.
///
/// ```text
/// chunks:  [ chunk 0 (in use)       ][ chunk 1 (in use) ][ chunk 2 (free)        ]
/// nodes:   [pad][ alloc ][  free  ][a]  [ alloc ][ alloc ]  [        free          ]
/// ```
///
/// Allocation is first fit in ascending address order. Free neighbours are
/// merged as soon as they appear, so no two free ranges are ever adjacent:
/// address nodes within a chunk, and free space at a chunk edge with free
/// space across that edge.
pub struct AddressSpace {
    id: u8,
    base: u64,
    size: u64,
    alignment: Alignment,
    chunks: NodePool<ChunkNode>,
    nodes: NodePool<AddrNode>,
    first_chunk: NodeId,
    free_bytes: u64,
    allocations: usize,
}

impl AddressSpace {
    /// Validate `config` and build a space holding one free chunk.
    ///
    /// This is the only place node storage is allocated.
    ///
    /// # Errors
    /// [`AllocError::InvalidAlignment`] or [`AllocError::InvalidConfig`].
    pub fn new(config: &SpaceConfig) -> Result<Self, AllocError> {
        let alignment =
            Alignment::new(config.alignment).ok_or(AllocError::InvalidAlignment(config.alignment))?;
        if config.size == 0 {
            return Err(AllocError::InvalidConfig("size is zero"));
        }
        if !config.base.is_aligned(alignment) {
            return Err(AllocError::InvalidConfig("base is not aligned"));
        }
        if !alignment.is_aligned(config.size) {
            return Err(AllocError::InvalidConfig("size is not a multiple of the alignment"));
        }
        if config.end().is_none() {
            return Err(AllocError::InvalidConfig("range overflows the address space"));
        }

        let slots = usize::try_from(config.size >> alignment.log2()).unwrap_or(usize::MAX);
        let max_chunks = pool_size(config.max_chunk_nodes, slots.min(MAX_CHUNK_NODES))?;
        let max_addrs = pool_size(config.max_addr_nodes, slots.min(MAX_ADDR_NODES))?;

        let mut chunks = NodePool::with_capacity(max_chunks);
        let mut nodes = NodePool::with_capacity(max_addrs);
        let base = config.base.as_u64();
        let node = nodes
            .insert(AddrNode::free(base, config.size))
            .ok_or(AllocError::OutOfNodes(NodeKind::Address))?;
        let first_chunk = chunks
            .insert(ChunkNode {
                addr: base,
                size: config.size,
                is_free: true,
                prev: None,
                next: None,
                nodes: node,
            })
            .ok_or(AllocError::OutOfNodes(NodeKind::Chunk))?;

        Ok(Self {
            id: config.space_id,
            base,
            size: config.size,
            alignment,
            chunks,
            nodes,
            first_chunk,
            free_bytes: config.size,
            allocations: 0,
        })
    }

    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base + self.size)
    }

    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn free_size(&self) -> u64 {
        self.free_bytes
    }

    #[must_use]
    pub const fn alignment(&self) -> Alignment {
        self.alignment
    }

    #[must_use]
    pub const fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Whether `addr` lies inside the space.
    #[must_use]
    pub const fn contains(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.base && addr.as_u64() - self.base < self.size
    }

    /// `(in use, capacity)` of the chunk and address node pools.
    #[must_use]
    pub fn node_usage(&self) -> ((usize, usize), (usize, usize)) {
        (
            (self.chunks.in_use(), self.chunks.capacity()),
            (self.nodes.in_use(), self.nodes.capacity()),
        )
    }

    /// Allocate `size` bytes aligned to `align` (at least the space granule).
    ///
    /// # Errors
    /// [`AllocError::ZeroSize`], [`AllocError::NoFit`] when no free range
    /// can hold the request, [`AllocError::OutOfNodes`] when the split would
    /// need more nodes than the pools hold. The space is unchanged on error.
    pub fn allocate(
        &mut self,
        size: u64,
        align: Option<Alignment>,
    ) -> Result<PhysicalAddress, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let align = align.map_or(self.alignment, |a| a.max(self.alignment));
        let no_fit = AllocError::NoFit {
            size,
            align: align.get(),
        };
        let size = self.alignment.align_up(size).ok_or(no_fit)?;
        let (chunk_id, node_id, start) = self.find_fit(size, align).ok_or(no_fit)?;

        let end = start + size;
        let (node_addr, node_end) = {
            let node = &self.nodes[node_id];
            (node.addr, node.end())
        };
        let head = start - node_addr;
        let tail = node_end - end;
        let split_chunk = self.chunks[chunk_id].is_free && tail > 0;

        let need_nodes = usize::from(head > 0) + usize::from(tail > 0);
        if self.nodes.available() < need_nodes {
            return Err(AllocError::OutOfNodes(NodeKind::Address));
        }
        if split_chunk && self.chunks.available() == 0 {
            return Err(AllocError::OutOfNodes(NodeKind::Chunk));
        }

        // Capacity is reserved above; each split either applies whole or not at all.
        if head > 0 {
            self.split_off_head(chunk_id, node_id, head)?;
        }
        if tail > 0 {
            if split_chunk {
                self.split_chunk_at(chunk_id, node_id, end)?;
            } else {
                self.split_off_tail(node_id, size)?;
            }
        }

        self.nodes[node_id].allocated = true;
        self.chunks[chunk_id].is_free = false;
        self.free_bytes -= size;
        self.allocations += 1;
        Ok(PhysicalAddress::new(start))
    }

    /// Release the allocation starting at `addr`; returns its (rounded) size.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if `addr` does not start a live allocation.
    pub fn free(&mut self, addr: PhysicalAddress) -> Result<u64, AllocError> {
        let (chunk_id, node_id) = self
            .locate(addr.as_u64())
            .ok_or(AllocError::InvalidFree(addr))?;

        let size = self.nodes[node_id].size;
        self.nodes[node_id].allocated = false;
        self.free_bytes += size;
        self.allocations -= 1;

        let mut current = node_id;
        if let Some(next) = self.nodes[current].next
            && !self.nodes[next].allocated
        {
            self.absorb_next_node(current, next);
        }
        if let Some(prev) = self.nodes[current].prev
            && !self.nodes[prev].allocated
        {
            self.absorb_next_node(prev, current);
            current = prev;
        }

        let (chunk, node) = self.join_prev_chunk(chunk_id, current);
        let (chunk, node) = self.join_next_chunk(chunk, node);
        let node = &self.nodes[node];
        if node.prev.is_none() && node.next.is_none() {
            self.chunks[chunk].is_free = true;
        }
        Ok(size)
    }

    /// Size of the allocation starting at `addr`.
    #[must_use]
    pub fn allocation_size(&self, addr: PhysicalAddress) -> Option<u64> {
        self.locate(addr.as_u64()).map(|(_, n)| self.nodes[n].size)
    }

    /// Snapshot of every chunk and its nodes, in address order.
    #[must_use]
    pub fn chunks(&self) -> Vec<ChunkInfo> {
        let mut out = Vec::new();
        let mut chunk = Some(self.first_chunk);
        while let Some(c) = chunk {
            let cn = &self.chunks[c];
            let mut nodes = Vec::new();
            let mut node = Some(cn.nodes);
            while let Some(n) = node {
                let an = &self.nodes[n];
                nodes.push(NodeInfo {
                    addr: PhysicalAddress::new(an.addr),
                    size: an.size,
                    allocated: an.allocated,
                });
                node = an.next;
            }
            out.push(ChunkInfo {
                addr: PhysicalAddress::new(cn.addr),
                size: cn.size,
                is_free: cn.is_free,
                nodes,
            });
            chunk = cn.next;
        }
        out
    }

    /// First free node (in address order) that can hold `size` at `align`.
    fn find_fit(&self, size: u64, align: Alignment) -> Option<(NodeId, NodeId, u64)> {
        let mut chunk = Some(self.first_chunk);
        while let Some(c) = chunk {
            let mut node = Some(self.chunks[c].nodes);
            while let Some(n) = node {
                let an = &self.nodes[n];
                if !an.allocated
                    && let Some(start) = align.align_up(an.addr)
                    && let Some(end) = start.checked_add(size)
                    && end <= an.end()
                {
                    return Some((c, n, start));
                }
                node = an.next;
            }
            chunk = self.chunks[c].next;
        }
        None
    }

    /// Chunk and node of the live allocation starting at `addr`.
    fn locate(&self, addr: u64) -> Option<(NodeId, NodeId)> {
        let mut chunk = Some(self.first_chunk);
        while let Some(c) = chunk {
            let cn = &self.chunks[c];
            if addr < cn.addr {
                return None;
            }
            if addr < cn.end() {
                let mut node = Some(cn.nodes);
                while let Some(n) = node {
                    let an = &self.nodes[n];
                    if an.addr == addr {
                        return an.allocated.then_some((c, n));
                    }
                    if an.addr > addr {
                        return None;
                    }
                    node = an.next;
                }
                return None;
            }
            chunk = cn.next;
        }
        None
    }

    /// Carve `[node.addr, node.addr + head)` into a new free node before `node_id`.
    fn split_off_head(
        &mut self,
        chunk_id: NodeId,
        node_id: NodeId,
        head: u64,
    ) -> Result<(), AllocError> {
        let (addr, prev) = {
            let node = &self.nodes[node_id];
            (node.addr, node.prev)
        };
        let mut pad = AddrNode::free(addr, head);
        pad.prev = prev;
        pad.next = Some(node_id);
        let pad_id = self
            .nodes
            .insert(pad)
            .ok_or(AllocError::OutOfNodes(NodeKind::Address))?;

        let node = &mut self.nodes[node_id];
        node.addr += head;
        node.size -= head;
        node.prev = Some(pad_id);
        match prev {
            Some(p) => self.nodes[p].next = Some(pad_id),
            None => self.chunks[chunk_id].nodes = pad_id,
        }
        Ok(())
    }

    /// Shrink `node_id` to `size` and put the remainder into a new free node after it.
    fn split_off_tail(&mut self, node_id: NodeId, size: u64) -> Result<(), AllocError> {
        let mut rest = {
            let node = &self.nodes[node_id];
            let mut rest = AddrNode::free(node.addr + size, node.size - size);
            rest.next = node.next;
            rest
        };
        rest.prev = Some(node_id);
        let next = rest.next;
        let rest_id = self
            .nodes
            .insert(rest)
            .ok_or(AllocError::OutOfNodes(NodeKind::Address))?;

        let node = &mut self.nodes[node_id];
        node.size = size;
        node.next = Some(rest_id);
        if let Some(n) = next {
            self.nodes[n].prev = Some(rest_id);
        }
        Ok(())
    }

    /// Split a free chunk at `at`; `[at, chunk end)` becomes a new free chunk.
    ///
    /// `node_id` is the last node of the chunk and must end past `at`.
    fn split_chunk_at(
        &mut self,
        chunk_id: NodeId,
        node_id: NodeId,
        at: u64,
    ) -> Result<(), AllocError> {
        let (chunk_end, next_chunk) = {
            let chunk = &self.chunks[chunk_id];
            (chunk.end(), chunk.next)
        };

        let rest_node = self
            .nodes
            .insert(AddrNode::free(at, chunk_end - at))
            .ok_or(AllocError::OutOfNodes(NodeKind::Address))?;
        let Some(rest_chunk) = self.chunks.insert(ChunkNode {
            addr: at,
            size: chunk_end - at,
            is_free: true,
            prev: Some(chunk_id),
            next: next_chunk,
            nodes: rest_node,
        }) else {
            self.nodes.remove(rest_node);
            return Err(AllocError::OutOfNodes(NodeKind::Chunk));
        };

        let chunk = &mut self.chunks[chunk_id];
        chunk.size = at - chunk.addr;
        chunk.next = Some(rest_chunk);
        if let Some(n) = next_chunk {
            self.chunks[n].prev = Some(rest_chunk);
        }
        self.nodes[node_id].size = at - self.nodes[node_id].addr;
        Ok(())
    }

    /// Merge address node `next` into its predecessor `keep` and release it.
    fn absorb_next_node(&mut self, keep: NodeId, next: NodeId) {
        let Some(gone) = self.nodes.remove(next) else {
            return;
        };
        let node = &mut self.nodes[keep];
        node.size += gone.size;
        node.next = gone.next;
        if let Some(n) = gone.next {
            self.nodes[n].prev = Some(keep);
        }
    }

    /// Last address node of `chunk_id`.
    fn last_node(&self, chunk_id: NodeId) -> NodeId {
        let mut node = self.chunks[chunk_id].nodes;
        while let Some(next) = self.nodes[node].next {
            node = next;
        }
        node
    }

    /// Hand the free first node of `chunk_id` to the previous chunk when that
    /// chunk ends in free space.
    ///
    /// Returns the chunk and node now holding the free range.
    fn join_prev_chunk(&mut self, chunk_id: NodeId, node_id: NodeId) -> (NodeId, NodeId) {
        let Some(prev) = self.chunks[chunk_id].prev else {
            return (chunk_id, node_id);
        };
        let last = self.last_node(prev);
        if self.nodes[node_id].prev.is_some() || self.nodes[last].allocated {
            return (chunk_id, node_id);
        }
        let Some(gone) = self.nodes.remove(node_id) else {
            return (chunk_id, node_id);
        };

        self.nodes[last].size += gone.size;
        self.chunks[prev].size += gone.size;
        match gone.next {
            Some(next) => {
                self.nodes[next].prev = None;
                let chunk = &mut self.chunks[chunk_id];
                chunk.addr += gone.size;
                chunk.size -= gone.size;
                chunk.nodes = next;
            }
            None => self.unlink_chunk(chunk_id),
        }
        (prev, last)
    }

    /// Join the free last node of `chunk_id` with free space at the start of
    /// the next chunk.
    ///
    /// A wholly free next chunk takes the range over; otherwise the next
    /// chunk's free head moves into this chunk. Returns the chunk and node
    /// now holding the free range.
    fn join_next_chunk(&mut self, chunk_id: NodeId, node_id: NodeId) -> (NodeId, NodeId) {
        let Some(next) = self.chunks[chunk_id].next else {
            return (chunk_id, node_id);
        };
        let first = self.chunks[next].nodes;
        if self.nodes[node_id].next.is_some() || self.nodes[first].allocated {
            return (chunk_id, node_id);
        }

        if self.chunks[next].is_free {
            let Some(gone) = self.nodes.remove(node_id) else {
                return (chunk_id, node_id);
            };
            let node = &mut self.nodes[first];
            node.addr = gone.addr;
            node.size += gone.size;
            let chunk = &mut self.chunks[next];
            chunk.addr = gone.addr;
            chunk.size += gone.size;
            match gone.prev {
                Some(p) => {
                    self.nodes[p].next = None;
                    self.chunks[chunk_id].size -= gone.size;
                }
                None => self.unlink_chunk(chunk_id),
            }
            return (next, first);
        }

        // A chunk in use always holds an allocated node after a free head.
        let Some(after) = self.nodes[first].next else {
            return (chunk_id, node_id);
        };
        let Some(gone) = self.nodes.remove(first) else {
            return (chunk_id, node_id);
        };
        self.nodes[after].prev = None;
        self.nodes[node_id].size += gone.size;
        self.chunks[chunk_id].size += gone.size;
        let chunk = &mut self.chunks[next];
        chunk.addr += gone.size;
        chunk.size -= gone.size;
        chunk.nodes = after;
        (chunk_id, node_id)
    }

    /// Drop an emptied chunk from the chunk list.
    fn unlink_chunk(&mut self, chunk_id: NodeId) {
        let Some(gone) = self.chunks.remove(chunk_id) else {
            return;
        };
        match gone.prev {
            Some(p) => self.chunks[p].next = gone.next,
            None => {
                if let Some(n) = gone.next {
                    self.first_chunk = n;
                }
            }
        }
        if let Some(n) = gone.next {
            self.chunks[n].prev = gone.prev;
        }
    }
}

fn pool_size(requested: Option<usize>, default: usize) -> Result<usize, AllocError> {
    let size = requested.unwrap_or(default);
    if size == 0 {
        return Err(AllocError::InvalidConfig("node limit is zero"));
    }
    if NodeId::try_from(size).is_err() {
        return Err(AllocError::InvalidConfig("node limit exceeds the index range"));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 0x1000_0000;

    fn space(size: u64, alignment: u64) -> AddressSpace {
        let config = SpaceConfig::new(0, PhysicalAddress::new(BASE), size, alignment);
        AddressSpace::new(&config).unwrap()
    }

    fn pa(offset: u64) -> PhysicalAddress {
        PhysicalAddress::new(BASE + offset)
    }

    #[test]
    fn first_allocation_splits_the_free_chunk() {
        let mut s = space(0x10000, 0x1000);
        assert_eq!(s.allocate(0x1000, None), Ok(pa(0)));

        let chunks = s.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].addr, chunks[0].size, chunks[0].is_free), (pa(0), 0x1000, false));
        assert_eq!((chunks[1].addr, chunks[1].size, chunks[1].is_free), (pa(0x1000), 0xF000, true));
        assert_eq!(s.free_size(), 0xF000);
    }

    #[test]
    fn sizes_round_up_to_the_granule() {
        let mut s = space(0x10000, 0x1000);
        assert_eq!(s.allocate(1, None), Ok(pa(0)));
        assert_eq!(s.allocation_size(pa(0)), Some(0x1000));
        assert_eq!(s.allocate(0x1001, None), Ok(pa(0x1000)));
        assert_eq!(s.allocation_size(pa(0x1000)), Some(0x2000));
    }

    #[test]
    fn alignment_padding_becomes_a_free_node() {
        let mut s = space(0x10000, 0x1000);
        s.allocate(0x1000, None).unwrap();
        let big = Alignment::new(0x4000);
        assert_eq!(s.allocate(0x1000, big), Ok(pa(0x4000)));

        let chunk = &s.chunks()[1];
        assert_eq!(chunk.addr, pa(0x1000));
        assert_eq!(
            chunk.nodes,
            [
                NodeInfo { addr: pa(0x1000), size: 0x3000, allocated: false },
                NodeInfo { addr: pa(0x4000), size: 0x1000, allocated: true },
            ]
        );

        // the padding is reused by the next small request
        assert_eq!(s.allocate(0x1000, None), Ok(pa(0x1000)));
    }

    #[test]
    fn freeing_merges_nodes_and_chunks_back() {
        let mut s = space(0x10000, 0x1000);
        let a = s.allocate(0x1000, None).unwrap();
        let b = s.allocate(0x2000, None).unwrap();
        let c = s.allocate(0x1000, None).unwrap();
        assert_eq!(s.allocation_count(), 3);

        assert_eq!(s.free(b), Ok(0x2000));
        assert_eq!(s.free(a), Ok(0x1000));
        assert_eq!(s.free(c), Ok(0x1000));

        let chunks = s.chunks();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_free);
        assert_eq!(chunks[0].nodes.len(), 1);
        assert_eq!(s.free_size(), 0x10000);
        assert_eq!(s.node_usage(), ((1, 16), (1, 16)));
    }

    #[test]
    fn double_and_interior_frees_are_rejected() {
        let mut s = space(0x10000, 0x1000);
        let a = s.allocate(0x2000, None).unwrap();
        assert_eq!(s.free(a + 0x1000), Err(AllocError::InvalidFree(a + 0x1000)));
        assert_eq!(s.free(pa(0x8000)), Err(AllocError::InvalidFree(pa(0x8000))));
        let below = PhysicalAddress::new(0x10);
        assert_eq!(s.free(below), Err(AllocError::InvalidFree(below)));
        s.free(a).unwrap();
        assert_eq!(s.free(a), Err(AllocError::InvalidFree(a)));
    }

    #[test]
    fn no_fit_leaves_the_space_untouched() {
        let mut s = space(0x4000, 0x1000);
        s.allocate(0x1000, None).unwrap();
        let before = s.chunks();
        assert_eq!(
            s.allocate(0x4000, None),
            Err(AllocError::NoFit { size: 0x4000, align: 0x1000 })
        );
        assert_eq!(s.allocate(0, None), Err(AllocError::ZeroSize));
        assert_eq!(s.chunks(), before);
    }

    #[test]
    fn node_exhaustion_is_a_hard_error() {
        let config =
            SpaceConfig::new(0, PhysicalAddress::new(BASE), 0x10000, 0x1000).with_node_limits(2, 3);
        let mut s = AddressSpace::new(&config).unwrap();
        s.allocate(0x1000, None).unwrap();
        // the second chunk split has no chunk node left
        assert_eq!(s.allocate(0x1000, None), Err(AllocError::OutOfNodes(NodeKind::Chunk)));
        assert_eq!(s.free_size(), 0xF000);
        // filling the remainder exactly needs no new nodes
        assert_eq!(s.allocate(0xF000, None), Ok(pa(0x1000)));
    }

    #[test]
    fn invalid_configurations_are_refused() {
        let at = |base, size, align| {
            AddressSpace::new(&SpaceConfig::new(0, PhysicalAddress::new(base), size, align)).err()
        };
        assert_eq!(at(BASE, 0x1000, 0x3000), Some(AllocError::InvalidAlignment(0x3000)));
        assert!(matches!(at(BASE, 0, 0x1000), Some(AllocError::InvalidConfig(_))));
        assert!(matches!(at(BASE + 0x10, 0x1000, 0x1000), Some(AllocError::InvalidConfig(_))));
        assert!(matches!(at(BASE, 0x1800, 0x1000), Some(AllocError::InvalidConfig(_))));
        assert!(matches!(
            at(u64::MAX - 0xFFF, 0x2000, 0x1000),
            Some(AllocError::InvalidConfig(_))
        ));
        let zero_pool =
            SpaceConfig::new(0, PhysicalAddress::new(BASE), 0x1000, 0x1000).with_node_limits(0, 4);
        assert!(matches!(
            AddressSpace::new(&zero_pool).err(),
            Some(AllocError::InvalidConfig(_))
        ));
    }
}
