//! # Identities
//!
//! Rows are named by [`Identity`] values: dense, monotonically issued,
//! never reused. The [`IdentityIndex`] is the sparse side of the store. It
//! maps every live identity to the archetype and row holding its data.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use super::archetype::ArchetypeId;
use crate::error::{StorageError, StorageResult};

/// Opaque handle naming one row.
///
/// Identities are issued in increasing order starting at zero and are never
/// handed out twice, so a released identity stays dead forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct Identity(u32);

impl Identity {
    /// Never issued. Useful as a placeholder.
    pub const NULL: Self = Self(u32::MAX);

    /// Wraps a raw identity value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw identity value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the identity as a sparse index slot.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true for the placeholder identity.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a live row is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    /// Owning archetype.
    pub archetype: ArchetypeId,
    /// Row within the archetype.
    pub row: u32,
}

impl Location {
    /// Marks a sparse slot whose identity is dead.
    pub const VACANT: Self = Self {
        archetype: ArchetypeId::NULL,
        row: u32::MAX,
    };

    /// Creates a location.
    ///
    /// # Panics
    ///
    /// Panics if `row` does not fit in 32 bits.
    #[inline]
    #[must_use]
    pub fn new(archetype: ArchetypeId, row: usize) -> Self {
        Self {
            archetype,
            row: u32::try_from(row).unwrap_or_else(|_| panic!("row index overflow")),
        }
    }

    /// Returns the row as an index.
    #[inline]
    #[must_use]
    pub const fn row(self) -> usize {
        self.row as usize
    }

    /// Returns true for a dead slot.
    #[inline]
    #[must_use]
    pub fn is_vacant(self) -> bool {
        self.archetype == ArchetypeId::NULL
    }
}

/// A contiguous run of identities issued together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityRange {
    start: u32,
    end: u32,
}

impl IdentityRange {
    /// Returns the first identity of the run, if any.
    #[must_use]
    pub fn first(&self) -> Option<Identity> {
        (self.start < self.end).then_some(Identity(self.start))
    }

    /// Returns the number of identities in the run.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Returns true for an empty run.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if `identity` belongs to the run.
    #[inline]
    #[must_use]
    pub const fn contains(&self, identity: Identity) -> bool {
        identity.0 >= self.start && identity.0 < self.end
    }

    /// Iterates over the run in order.
    pub fn iter(&self) -> impl Iterator<Item = Identity> {
        (self.start..self.end).map(Identity)
    }
}

/// Identity allocator and sparse index in one.
///
/// Identities double as slot indices. A slot holds the row's [`Location`]
/// while alive and [`Location::VACANT`] once released.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    /// Sparse slots, one per identity ever issued.
    slots: Vec<Location>,
    /// Number of live identities.
    live: usize,
}

impl IdentityIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an index with slots reserved for `capacity` identities.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Returns the number of live identities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no identity is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns how many identities were ever issued.
    #[inline]
    #[must_use]
    pub fn issued(&self) -> usize {
        self.slots.len()
    }

    /// Reserves slots for `additional` more identities.
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    /// Issues a fresh identity stored at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IdentitiesExhausted`] once the 32-bit space
    /// is used up.
    pub fn allocate(&mut self, location: Location) -> StorageResult<Identity> {
        let range = self.reserve_range(1)?;
        self.slots.push(location);
        self.live += 1;
        Ok(Identity(range.start))
    }

    /// Issues `count` consecutive identities for rows
    /// `first_row..first_row + count` of `archetype`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IdentitiesExhausted`] if the run does not fit.
    pub fn allocate_range(
        &mut self,
        count: usize,
        archetype: ArchetypeId,
        first_row: usize,
    ) -> StorageResult<IdentityRange> {
        let range = self.reserve_range(count)?;
        self.slots
            .extend((0..count).map(|offset| Location::new(archetype, first_row + offset)));
        self.live += count;
        Ok(range)
    }

    /// Returns true if `identity` is alive.
    #[inline]
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.get(identity).is_some()
    }

    /// Returns the location of a live identity.
    #[inline]
    #[must_use]
    pub fn get(&self, identity: Identity) -> Option<Location> {
        self.slots
            .get(identity.index())
            .copied()
            .filter(|location| !location.is_vacant())
    }

    /// Returns the location of a live identity or a dead-identity error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadIdentity`] if `identity` is not alive.
    pub fn locate(&self, identity: Identity) -> StorageResult<Location> {
        self.get(identity).ok_or(StorageError::DeadIdentity(identity))
    }

    /// Points a live identity at a new location.
    pub fn relocate(&mut self, identity: Identity, location: Location) {
        debug_assert!(self.contains(identity), "relocating dead identity {identity}");
        if let Some(slot) = self.slots.get_mut(identity.index()) {
            *slot = location;
        }
    }

    /// Updates only the row of a live identity.
    pub fn set_row(&mut self, identity: Identity, row: usize) {
        if let Some(location) = self.get(identity) {
            self.relocate(identity, Location::new(location.archetype, row));
        }
    }

    /// Marks an identity dead and returns where it lived.
    pub fn release(&mut self, identity: Identity) -> Option<Location> {
        let location = self.get(identity)?;
        self.slots[identity.index()] = Location::VACANT;
        self.live -= 1;
        Some(location)
    }

    fn reserve_range(&self, count: usize) -> StorageResult<IdentityRange> {
        let start = u32::try_from(self.slots.len()).map_err(|_| StorageError::IdentitiesExhausted)?;
        let end = u32::try_from(count)
            .ok()
            .and_then(|count| start.checked_add(count))
            .filter(|&end| end < u32::MAX)
            .ok_or(StorageError::IdentitiesExhausted)?;
        Ok(IdentityRange { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(archetype: u32, row: usize) -> Location {
        Location::new(ArchetypeId::from_raw(archetype), row)
    }

    #[test]
    fn test_identity_allocate_is_monotonic() {
        let mut index = IdentityIndex::new();
        let a = index.allocate(at(0, 0)).unwrap();
        let b = index.allocate(at(0, 1)).unwrap();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_identity_release_never_reused() {
        let mut index = IdentityIndex::new();
        let a = index.allocate(at(0, 0)).unwrap();
        assert_eq!(index.release(a), Some(at(0, 0)));
        assert!(!index.contains(a));
        assert_eq!(index.release(a), None);

        let b = index.allocate(at(0, 0)).unwrap();
        assert_ne!(a, b);
        assert_eq!(index.len(), 1);
        assert_eq!(index.issued(), 2);
    }

    #[test]
    fn test_identity_range() {
        let mut index = IdentityIndex::new();
        index.allocate(at(0, 0)).unwrap();
        let range = index.allocate_range(3, ArchetypeId::from_raw(1), 5).unwrap();

        assert_eq!(range.len(), 3);
        assert_eq!(range.first(), Some(Identity::from_raw(1)));
        let ids: Vec<_> = range.iter().collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(index.get(ids[2]), Some(at(1, 7)));
        assert!(range.contains(ids[1]));
        assert!(!range.contains(Identity::from_raw(0)));
    }

    #[test]
    fn test_unissued_identity_is_dead() {
        let index = IdentityIndex::new();
        assert!(!index.contains(Identity::from_raw(10)));
        assert_eq!(
            index.locate(Identity::NULL),
            Err(StorageError::DeadIdentity(Identity::NULL))
        );
    }

    #[test]
    fn test_set_row() {
        let mut index = IdentityIndex::new();
        let a = index.allocate(at(2, 9)).unwrap();
        index.set_row(a, 3);
        assert_eq!(index.get(a), Some(at(2, 3)));
    }

    #[test]
    fn test_identity_pod_bytes() {
        let ids = [Identity::from_raw(1), Identity::from_raw(0x0102_0304)];
        let bytes: &[u8] = bytemuck::cast_slice(&ids);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1_u32.to_ne_bytes());
    }
}
