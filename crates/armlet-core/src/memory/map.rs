//! Mapped-region bookkeeping for the guest address space.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use tracing::debug;

use super::MemoryError;

/// Mapping granularity; region bases and sizes must be multiples of this.
pub const PAGE_SIZE: u32 = 0x1000;

/// Size of the full 32-bit guest address space.
const ADDRESS_SPACE_END: u64 = 1 << 32;

/// Access permission bit set attached to each mapped region.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Permissions(u8);

impl Permissions {
    /// No access at all.
    pub const NONE: Self = Self(0);
    /// Data loads allowed.
    pub const READ: Self = Self(1 << 0);
    /// Data stores allowed.
    pub const WRITE: Self = Self(1 << 1);
    /// Instruction fetch allowed.
    pub const EXEC: Self = Self(1 << 2);
    /// Read, write, and execute.
    pub const ALL: Self = Self(Self::READ.0 | Self::WRITE.0 | Self::EXEC.0);

    /// Returns the raw bit set.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a permission set from raw bits, rejecting unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Returns `true` when every bit of `other` is present in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |perm: Self, c: char| if self.contains(perm) { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(Self::READ, 'r'),
            flag(Self::WRITE, 'w'),
            flag(Self::EXEC, 'x')
        )
    }
}

/// Descriptor of one mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryRegion {
    /// First mapped address.
    pub base: u32,
    /// Size in bytes.
    pub size: u32,
    /// Access permissions.
    pub perms: Permissions,
}

#[allow(clippy::cast_lossless)]
impl MemoryRegion {
    /// Exclusive end address, widened so a region ending at the top of the space is representable.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    /// Returns `true` when `addr` lies inside this region.
    #[must_use]
    pub const fn contains(&self, addr: u32) -> bool {
        addr >= self.base && (addr as u64) < self.end()
    }

    const fn intersects(&self, base: u32, size: u32) -> bool {
        let end = base as u64 + size as u64;
        (self.base as u64) < end && (base as u64) < self.end()
    }
}

#[derive(Clone)]
pub(super) struct MappedRegion {
    pub(super) region: MemoryRegion,
    pub(super) data: Box<[u8]>,
}

/// Guest address space: a set of non-overlapping mapped regions.
#[derive(Clone, Default)]
pub struct Memory {
    pub(super) regions: BTreeMap<u32, MappedRegion>,
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.regions()).finish()
    }
}

impl Memory {
    /// Creates an empty address space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a zero-filled region with full permissions.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidMapping`] for empty, unaligned, or
    /// wrapping ranges and [`MemoryError::Overlap`] when the range intersects
    /// an existing region.
    pub fn map(&mut self, address: u32, size: u32) -> Result<(), MemoryError> {
        self.map_with_perms(address, size, Permissions::ALL)
    }

    /// Maps a zero-filled region with explicit permissions.
    ///
    /// # Errors
    ///
    /// Same as [`Memory::map`].
    pub fn map_with_perms(
        &mut self,
        address: u32,
        size: u32,
        perms: Permissions,
    ) -> Result<(), MemoryError> {
        validate_range(address, size)?;

        if let Some(existing) = self.first_intersecting(address, size) {
            return Err(MemoryError::Overlap {
                address,
                size,
                existing: existing.base,
            });
        }

        let len = usize::try_from(size).map_err(|_| MemoryError::InvalidMapping { address, size })?;
        self.regions.insert(
            address,
            MappedRegion {
                region: MemoryRegion {
                    base: address,
                    size,
                    perms,
                },
                data: vec![0; len].into_boxed_slice(),
            },
        );
        debug!(address, size, ?perms, "mapped region");
        Ok(())
    }

    /// Removes the region mapped exactly at `address..address + size`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotMapped`] unless one region matches the range exactly.
    pub fn unmap(&mut self, address: u32, size: u32) -> Result<(), MemoryError> {
        self.exact_region(address, size)?;
        self.regions.remove(&address);
        debug!(address, size, "unmapped region");
        Ok(())
    }

    /// Replaces the permissions of the region mapped exactly at `address..address + size`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotMapped`] unless one region matches the range exactly.
    pub fn protect(
        &mut self,
        address: u32,
        size: u32,
        perms: Permissions,
    ) -> Result<(), MemoryError> {
        self.exact_region(address, size)?;
        if let Some(mapped) = self.regions.get_mut(&address) {
            mapped.region.perms = perms;
        }
        debug!(address, size, ?perms, "changed region permissions");
        Ok(())
    }

    /// Mapped regions in ascending address order.
    pub fn regions(&self) -> impl Iterator<Item = MemoryRegion> + '_ {
        self.regions.values().map(|mapped| mapped.region)
    }

    /// Returns the region containing `addr`, if any.
    #[must_use]
    pub fn region_at(&self, addr: u32) -> Option<MemoryRegion> {
        self.mapped_at(addr).map(|mapped| mapped.region)
    }

    pub(super) fn mapped_at(&self, addr: u32) -> Option<&MappedRegion> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, mapped)| mapped)
            .filter(|mapped| mapped.region.contains(addr))
    }

    fn first_intersecting(&self, address: u32, size: u32) -> Option<MemoryRegion> {
        let before = self
            .regions
            .range(..address)
            .next_back()
            .map(|(_, mapped)| mapped.region);
        let from = self
            .regions
            .range(address..)
            .next()
            .map(|(_, mapped)| mapped.region);

        before
            .into_iter()
            .chain(from)
            .find(|region| region.intersects(address, size))
    }

    fn exact_region(&self, address: u32, size: u32) -> Result<MemoryRegion, MemoryError> {
        self.regions
            .get(&address)
            .map(|mapped| mapped.region)
            .filter(|region| region.size == size)
            .ok_or(MemoryError::NotMapped { address, size })
    }
}

fn validate_range(address: u32, size: u32) -> Result<(), MemoryError> {
    let aligned = address % PAGE_SIZE == 0 && size % PAGE_SIZE == 0;
    let fits = u64::from(address) + u64::from(size) <= ADDRESS_SPACE_END;
    if size == 0 || !aligned || !fits {
        return Err(MemoryError::InvalidMapping { address, size });
    }
    Ok(())
}
