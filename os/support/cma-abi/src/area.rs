use core::mem::{offset_of, size_of};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// How an allocation is addressed.
///
/// [`Access::Physical`] is the bus address itself; the other kinds are
/// virtual aliases with the named cache policy.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Access {
    Physical = 0,
    CachedWriteBack = 1,
    CachedWriteThrough = 2,
    NonCachedBufferable = 3,
    NonCachedNonBufferable = 4,
}

impl Access {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Physical,
        Self::CachedWriteBack,
        Self::CachedWriteThrough,
        Self::NonCachedBufferable,
        Self::NonCachedNonBufferable,
    ];

    /// The virtual alias kinds, i.e. everything but [`Access::Physical`].
    pub const MAPPINGS: [Self; Self::COUNT - 1] = [
        Self::CachedWriteBack,
        Self::CachedWriteThrough,
        Self::NonCachedBufferable,
        Self::NonCachedNonBufferable,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Physical),
            1 => Some(Self::CachedWriteBack),
            2 => Some(Self::CachedWriteThrough),
            3 => Some(Self::NonCachedBufferable),
            4 => Some(Self::NonCachedNonBufferable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cached(self) -> bool {
        matches!(self, Self::CachedWriteBack | Self::CachedWriteThrough)
    }
}

/// Ownership record of one allocation.
///
/// Held by the kernel registry for every live allocation. An address of `0`
/// means "alias not present"; the physical alias is always present.
///
/// ```text
/// +0   pid       u32   (+4 pad)
/// +8   address   [u64; 5]   indexed by Access
/// +48  size      u64
/// +56  chunk_id  u8    (+7 pad)
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MemArea {
    pub pid: u32,
    pub address: [u64; Access::COUNT],
    pub size: u64,
    pub chunk_id: u8,
}

const _: () = {
    assert!(size_of::<MemArea>() == 64);
    assert!(offset_of!(MemArea, pid) == 0);
    assert!(offset_of!(MemArea, address) == 8);
    assert!(offset_of!(MemArea, size) == 48);
    assert!(offset_of!(MemArea, chunk_id) == 56);
};

impl MemArea {
    #[must_use]
    pub const fn new(pid: u32, physical: PhysicalAddress, size: u64, chunk_id: u8) -> Self {
        let mut address = [0; Access::COUNT];
        address[Access::Physical.index()] = physical.as_u64();
        Self {
            pid,
            address,
            size,
            chunk_id,
        }
    }

    #[inline]
    #[must_use]
    pub const fn physical(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.address[Access::Physical.index()])
    }

    /// First physical byte past the allocation.
    #[inline]
    #[must_use]
    pub const fn physical_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.physical().as_u64().saturating_add(self.size))
    }

    /// The virtual alias for `access`; `None` for [`Access::Physical`] or an
    /// absent mapping.
    #[must_use]
    pub const fn alias(&self, access: Access) -> Option<VirtualAddress> {
        match access {
            Access::Physical => None,
            _ => match self.address[access.index()] {
                0 => None,
                va => Some(VirtualAddress::new(va)),
            },
        }
    }

    /// Record a virtual alias. Setting the physical alias is refused.
    pub const fn set_alias(&mut self, access: Access, va: VirtualAddress) -> bool {
        if matches!(access, Access::Physical) {
            return false;
        }
        self.address[access.index()] = va.as_u64();
        true
    }

    /// Forget a virtual alias and return it.
    pub const fn take_alias(&mut self, access: Access) -> Option<VirtualAddress> {
        let alias = self.alias(access);
        if alias.is_some() {
            self.address[access.index()] = 0;
        }
        alias
    }

    /// All live virtual aliases.
    pub fn aliases(&self) -> impl Iterator<Item = (Access, VirtualAddress)> + '_ {
        Access::MAPPINGS
            .into_iter()
            .filter_map(|a| self.alias(a).map(|va| (a, va)))
    }

    #[must_use]
    pub fn has_aliases(&self) -> bool {
        self.aliases().next().is_some()
    }

    /// Whether `phys` lies inside the allocation.
    #[must_use]
    pub const fn contains(&self, phys: PhysicalAddress) -> bool {
        phys.as_u64() >= self.physical().as_u64() && phys.as_u64() < self.physical_end().as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_indices_match_layout() {
        for (i, a) in Access::ALL.into_iter().enumerate() {
            assert_eq!(a.index(), i);
            assert_eq!(Access::from_index(i), Some(a));
        }
        assert_eq!(Access::from_index(5), None);
        assert!(Access::CachedWriteThrough.is_cached());
        assert!(!Access::NonCachedBufferable.is_cached());
    }

    #[test]
    fn new_area_has_only_physical_alias() {
        let area = MemArea::new(7, PhysicalAddress::new(0x1000_0000), 0x2000, 1);
        assert_eq!(area.physical().as_u64(), 0x1000_0000);
        assert_eq!(area.physical_end().as_u64(), 0x1000_2000);
        assert!(!area.has_aliases());
        assert_eq!(area.alias(Access::Physical), None);
        assert!(area.contains(PhysicalAddress::new(0x1000_1FFF)));
        assert!(!area.contains(PhysicalAddress::new(0x1000_2000)));
    }

    #[test]
    fn aliases_are_tracked_per_access() {
        let mut area = MemArea::new(1, PhysicalAddress::new(0x4000), 0x1000, 0);
        assert!(!area.set_alias(Access::Physical, VirtualAddress::new(1)));
        assert!(area.set_alias(Access::NonCachedBufferable, VirtualAddress::new(0xA000)));
        assert!(area.set_alias(Access::CachedWriteBack, VirtualAddress::new(0xB000)));

        let live: Vec<_> = area.aliases().collect();
        assert_eq!(
            live,
            [
                (Access::CachedWriteBack, VirtualAddress::new(0xB000)),
                (Access::NonCachedBufferable, VirtualAddress::new(0xA000)),
            ]
        );
        assert_eq!(
            area.take_alias(Access::CachedWriteBack),
            Some(VirtualAddress::new(0xB000))
        );
        assert_eq!(area.take_alias(Access::CachedWriteBack), None);
        assert_eq!(area.physical().as_u64(), 0x4000);
    }
}
