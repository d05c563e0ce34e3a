use alloc::vec::Vec;

/// Index of a node inside a [`NodePool`].
pub(crate) type NodeId = u32;

/// Fixed-capacity arena of nodes with an explicit free-index list.
///
/// All storage is reserved up front; [`insert`](Self::insert) never touches
/// the heap and fails once the pool is exhausted.
pub(crate) struct NodePool<T> {
    slots: Vec<Option<T>>,
    /// Unused slot indices; popped from the back, lowest index first.
    free: Vec<NodeId>,
}

impl<T> NodePool<T> {
    /// Reserve `capacity` slots. `capacity` must fit a [`NodeId`].
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        let free = (0..capacity)
            .rev()
            .filter_map(|i| NodeId::try_from(i).ok())
            .collect();
        Self { slots, free }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub(crate) fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Store `value`; `None` if the pool is exhausted.
    pub(crate) fn insert(&mut self, value: T) -> Option<NodeId> {
        let id = self.free.pop()?;
        self.slots[id as usize] = Some(value);
        Some(id)
    }

    /// Release slot `id` and hand back its value.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<T> {
        let value = self.slots.get_mut(id as usize)?.take()?;
        self.free.push(id);
        Some(value)
    }

    #[inline]
    pub(crate) fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id as usize)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots.get_mut(id as usize)?.as_mut()
    }
}

impl<T> core::ops::Index<NodeId> for NodePool<T> {
    type Output = T;

    /// Panics on a released slot; list links only ever name live nodes.
    fn index(&self, id: NodeId) -> &T {
        match self.get(id) {
            Some(node) => node,
            None => panic!("dangling node id {id}"),
        }
    }
}

impl<T> core::ops::IndexMut<NodeId> for NodePool<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        match self.get_mut(id) {
            Some(node) => node,
            None => panic!("dangling node id {id}"),
        }
    }
}
