//! # Archetype Tables
//!
//! Rows with exactly the same attribute set live in the same table.
//!
//! ## Layout
//!
//! One column per attribute, in signature order, plus the identity list:
//!
//! ```text
//! identities:  [#7, #2, #9, ...]
//! Position[]:  [P7, P2, P9, ...]
//! Velocity[]:  [V7, V2, V9, ...]
//! ```
//!
//! Row `i` of every column belongs to `identities[i]`. Removal is a
//! swap-remove: the last row fills the hole and the identity index is told
//! about the move.

// SAFETY: Rows are written from caller-supplied raw pointers.
// Every entry point taking pointers is `unsafe` and states its contract.
#![allow(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

use super::component::AttributeId;
use super::entity::{Identity, IdentityIndex, IdentityRange, Location};
use super::storage::Column;
use crate::error::{StorageError, StorageResult};

/// Handle of an archetype within its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Names no archetype.
    pub const NULL: Self = Self(u32::MAX);

    /// Wraps a raw handle value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the handle as a registry index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archetype#{}", self.0)
    }
}

/// Salt mixed into every id before folding.
const FINGERPRINT_SALT: u32 = 0x9e37_79b9;

/// Order-independent fingerprint of an attribute set.
///
/// XOR of the salted ids plus the plain sum of the ids. Different sets can
/// collide, so a fingerprint match alone never proves equality.
#[must_use]
pub fn fingerprint(attributes: &[AttributeId]) -> u32 {
    let (mixed, sum) = attributes.iter().fold((0_u32, 0_u32), |(mixed, sum), id| {
        (
            mixed ^ id.raw().wrapping_add(FINGERPRINT_SALT),
            sum.wrapping_add(id.raw()),
        )
    });
    mixed.wrapping_add(sum)
}

/// Set of attributes held by one archetype.
///
/// Sorted and free of duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ArchetypeSignature {
    /// Sorted attribute handles.
    attributes: Vec<AttributeId>,
    /// Cached fingerprint of `attributes`.
    fingerprint: u32,
}

impl ArchetypeSignature {
    /// Creates a signature, sorting and dropping duplicates.
    #[must_use]
    pub fn new(attributes: impl IntoIterator<Item = AttributeId>) -> Self {
        let mut attributes: Vec<_> = attributes.into_iter().collect();
        attributes.sort_unstable();
        attributes.dedup();
        Self::from_sorted(attributes)
    }

    /// Creates a signature, rejecting duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DuplicateAttribute`] if an id appears twice.
    pub fn try_new(attributes: &[AttributeId]) -> StorageResult<Self> {
        let mut sorted = attributes.to_vec();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(StorageError::DuplicateAttribute(pair[0].to_string()));
        }
        Ok(Self::from_sorted(sorted))
    }

    fn from_sorted(attributes: Vec<AttributeId>) -> Self {
        let fingerprint = fingerprint(&attributes);
        Self {
            attributes,
            fingerprint,
        }
    }

    /// Returns the sorted attribute handles.
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &[AttributeId] {
        &self.attributes
    }

    /// Returns the cached fingerprint.
    #[inline]
    #[must_use]
    pub const fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    /// Returns the number of attributes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Returns the column position of an attribute.
    #[inline]
    #[must_use]
    pub fn position(&self, attribute: AttributeId) -> Option<usize> {
        self.attributes.binary_search(&attribute).ok()
    }

    /// Checks if this signature contains an attribute.
    #[inline]
    #[must_use]
    pub fn contains(&self, attribute: AttributeId) -> bool {
        self.position(attribute).is_some()
    }

    /// Checks if every attribute of `other` is also in `self`.
    #[must_use]
    pub fn is_superset_of(&self, other: &[AttributeId]) -> bool {
        other.iter().all(|&id| self.contains(id))
    }

    /// Returns the union with `added`.
    #[must_use]
    pub fn with(&self, added: &[AttributeId]) -> Self {
        Self::new(self.attributes.iter().chain(added).copied())
    }

    /// Returns the signature without `removed`.
    #[must_use]
    pub fn without(&self, removed: AttributeId) -> Self {
        Self::from_sorted(
            self.attributes
                .iter()
                .copied()
                .filter(|&id| id != removed)
                .collect(),
        )
    }
}

/// Where a new value for one column comes from.
#[derive(Clone, Copy, Debug)]
pub enum ValueSource {
    /// Default-construct in place.
    Default,
    /// Move out of the pointed-to value.
    Move(NonNull<u8>),
    /// Copy-construct from the pointed-to value.
    Copy(NonNull<u8>),
}

/// Raw bounds of one column for bulk iteration.
///
/// Invalidated by any insertion, removal or growth on the owning table.
#[derive(Clone, Copy, Debug)]
pub struct ColumnSpan {
    /// First element.
    pub begin: *mut u8,
    /// One past the last element.
    pub end: *mut u8,
    /// Element size in bytes.
    pub stride: usize,
}

/// A single archetype table - stores all rows with the same attribute set.
///
/// The table does not own the identity index. Every operation that issues,
/// moves or releases identities takes it as a parameter, and only the
/// owning registry may call them. Outside the crate a table is read through
/// `&ArchetypeTable` and written through [`ArchetypeTableMut`].
pub struct ArchetypeTable {
    /// Handle within the registry.
    id: ArchetypeId,
    /// Attribute set of every row.
    signature: ArchetypeSignature,
    /// One column per signature entry, same order.
    columns: Vec<Column>,
    /// Identity of every row.
    identities: Vec<Identity>,
}

impl ArchetypeTable {
    /// Creates an empty table.
    ///
    /// # Arguments
    ///
    /// * `id` - Handle within the registry
    /// * `signature` - Attribute set of every row
    /// * `columns` - One empty column per signature entry, in signature order
    ///
    /// # Panics
    ///
    /// Panics if the columns do not match the signature.
    #[must_use]
    pub(crate) fn new(id: ArchetypeId, signature: ArchetypeSignature, columns: Vec<Column>) -> Self {
        assert!(
            columns
                .iter()
                .map(Column::attribute)
                .eq(signature.attributes().iter().copied()),
            "columns must follow signature order"
        );
        assert!(columns.iter().all(Column::is_empty), "columns must start empty");

        Self {
            id,
            signature,
            columns,
            identities: Vec::new(),
        }
    }

    /// Returns the table's handle.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Returns the attribute set.
    #[inline]
    #[must_use]
    pub const fn signature(&self) -> &ArchetypeSignature {
        &self.signature
    }

    /// Returns the number of rows.
    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.identities.len()
    }

    /// Returns the number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Returns how many rows fit before some column must grow.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.columns
            .iter()
            .filter(|column| !column.descriptor().is_zero_sized())
            .map(Column::capacity)
            .min()
            .unwrap_or_else(|| self.identities.capacity())
    }

    /// Returns the identity of every row, parallel to the columns.
    #[inline]
    #[must_use]
    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Returns the identity list as raw bytes.
    #[must_use]
    pub fn identity_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.identities)
    }

    /// Returns all columns in signature order.
    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Checks if rows of this table carry `attribute`.
    #[inline]
    #[must_use]
    pub fn contains_type(&self, attribute: AttributeId) -> bool {
        self.signature.contains(attribute)
    }

    /// Checks if `identity` is stored in this table.
    #[must_use]
    pub fn contains_identity(&self, identity: Identity, index: &IdentityIndex) -> bool {
        index.get(identity).is_some_and(|location| {
            location.archetype == self.id && self.identities.get(location.row()) == Some(&identity)
        })
    }

    /// Returns the column for `attribute`.
    #[inline]
    #[must_use]
    pub fn column(&self, attribute: AttributeId) -> Option<&Column> {
        self.signature.position(attribute).map(|i| &self.columns[i])
    }

    /// Returns the mutable column for `attribute`.
    #[inline]
    pub(crate) fn column_mut(&mut self, attribute: AttributeId) -> Option<&mut Column> {
        self.signature
            .position(attribute)
            .map(|i| &mut self.columns[i])
    }

    /// Returns two distinct columns mutably at once.
    ///
    /// `None` if either is missing or both name the same attribute.
    pub(crate) fn column_pair_mut(
        &mut self,
        first: AttributeId,
        second: AttributeId,
    ) -> Option<(&mut Column, &mut Column)> {
        let a = self.signature.position(first)?;
        let b = self.signature.position(second)?;
        if a == b {
            return None;
        }
        let (low, high) = (a.min(b), a.max(b));
        let (head, tail) = self.columns.split_at_mut(high);
        let (low_col, high_col) = (&mut head[low], &mut tail[0]);
        if a < b {
            Some((low_col, high_col))
        } else {
            Some((high_col, low_col))
        }
    }

    /// Returns begin/end pointers for each requested attribute, in request
    /// order. `None` if any attribute is missing.
    pub(crate) fn raw_columns(&mut self, attributes: &[AttributeId]) -> Option<Vec<ColumnSpan>> {
        attributes
            .iter()
            .map(|&attribute| {
                let column = self.column_mut(attribute)?;
                let stride = column.descriptor().size;
                let end = column.end().cast_mut();
                Some(ColumnSpan {
                    begin: column.data_mut(),
                    end,
                    stride,
                })
            })
            .collect()
    }

    /// Returns a pointer to one attribute of one row.
    #[must_use]
    pub fn get_raw(&self, attribute: AttributeId, row: usize) -> Option<NonNull<u8>> {
        self.column(attribute)?.get_raw(row)
    }

    /// Reserves room for `additional` more rows in every column.
    pub(crate) fn reserve(&mut self, additional: usize) {
        let target = self.len() + additional;
        for column in &mut self.columns {
            column.reserve(target);
        }
        self.identities.reserve(additional);
    }

    /// Appends one default-constructed row and returns its identity.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IdentitiesExhausted`] if no identity is left.
    pub(crate) fn create_one(&mut self, index: &mut IdentityIndex) -> StorageResult<Identity> {
        // SAFETY: no pointers supplied
        unsafe { self.create_one_with(index, &[]) }
    }

    /// Appends one row with per-attribute value sources.
    ///
    /// Attributes not listed are default-constructed.
    ///
    /// # Safety
    ///
    /// Every `Move`/`Copy` pointer must hold a live value of the listed
    /// attribute's type, outside this table. Moved-from values must not be
    /// dropped by the caller afterwards.
    ///
    /// # Errors
    ///
    /// - [`StorageError::AttributeNotInArchetype`] for a listed attribute the
    ///   table does not carry
    /// - [`StorageError::IdentitiesExhausted`] if no identity is left
    ///
    /// Nothing is written on error.
    pub(crate) unsafe fn create_one_with(
        &mut self,
        index: &mut IdentityIndex,
        values: &[(AttributeId, ValueSource)],
    ) -> StorageResult<Identity> {
        self.check_owned(values.iter().map(|(attribute, _)| *attribute))?;

        let row = self.len();
        let identity = index.allocate(Location::new(self.id, row))?;
        for column in &mut self.columns {
            write_value(column, source_for(values, column.attribute()));
        }
        self.identities.push(identity);

        self.debug_check();
        Ok(identity)
    }

    /// Appends `count` default-constructed rows.
    ///
    /// Identities are issued as one consecutive run before any column is
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::IdentitiesExhausted`] if the run does not fit.
    pub(crate) fn create_many(
        &mut self,
        count: usize,
        index: &mut IdentityIndex,
    ) -> StorageResult<IdentityRange> {
        let first_row = self.len();
        let range = index.allocate_range(count, self.id, first_row)?;
        for column in &mut self.columns {
            column.resize(first_row + count);
        }
        self.identities.extend(range.iter());

        self.debug_check();
        Ok(range)
    }

    /// Appends `count` rows copied from prototype values.
    ///
    /// Attributes without a prototype are default-constructed.
    ///
    /// # Safety
    ///
    /// Every pointer must hold a live value of the listed attribute's type,
    /// outside this table.
    ///
    /// # Errors
    ///
    /// Same as [`ArchetypeTable::create_one_with`].
    pub(crate) unsafe fn create_many_cloned(
        &mut self,
        count: usize,
        index: &mut IdentityIndex,
        prototypes: &[(AttributeId, NonNull<u8>)],
    ) -> StorageResult<IdentityRange> {
        self.check_owned(prototypes.iter().map(|(attribute, _)| *attribute))?;

        let first_row = self.len();
        let range = index.allocate_range(count, self.id, first_row)?;
        for column in &mut self.columns {
            let attribute = column.attribute();
            match prototypes.iter().find(|(id, _)| *id == attribute) {
                Some((_, src)) => column.extend_copies(count, src.as_ptr().cast_const()),
                None => column.resize(first_row + count),
            }
        }
        self.identities.extend(range.iter());

        self.debug_check();
        Ok(range)
    }

    /// Appends `count` rows copied from the row of `prototype`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] / [`StorageError::ForeignIdentity`]
    ///   if `prototype` is not stored here
    /// - [`StorageError::IdentitiesExhausted`] if the run does not fit
    pub(crate) fn create_many_from(
        &mut self,
        count: usize,
        prototype: Identity,
        index: &mut IdentityIndex,
    ) -> StorageResult<IdentityRange> {
        let row = self.row_of(prototype, index)?;
        let first_row = self.len();
        let range = index.allocate_range(count, self.id, first_row)?;
        for column in &mut self.columns {
            column.extend_copies_of_row(count, row);
        }
        self.identities.extend(range.iter());

        self.debug_check();
        Ok(range)
    }

    /// Removes a row by swap-remove and releases its identity.
    ///
    /// The identity previously in the last row takes over the removed row.
    ///
    /// # Errors
    ///
    /// [`StorageError::DeadIdentity`] or [`StorageError::ForeignIdentity`]
    /// if `identity` is not stored here. Nothing changes on error.
    pub(crate) fn remove(&mut self, identity: Identity, index: &mut IdentityIndex) -> StorageResult<()> {
        let row = self.row_of(identity, index)?;
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.remove_identity_at(row, index);
        index.release(identity);

        self.debug_check();
        Ok(())
    }

    /// Moves a row into `destination`, default-constructing attributes that
    /// only the destination carries. Returns the destination row.
    ///
    /// # Errors
    ///
    /// Same as [`ArchetypeTable::migrate_with`].
    pub(crate) fn migrate(
        &mut self,
        destination: &mut ArchetypeTable,
        identity: Identity,
        index: &mut IdentityIndex,
    ) -> StorageResult<usize> {
        // SAFETY: no pointers supplied
        unsafe { self.migrate_with(destination, identity, index, &[]) }
    }

    /// Moves a row into `destination`.
    ///
    /// Shared attributes are relocated column by column. Attributes only the
    /// destination carries take their value from `values`, or are
    /// default-constructed. Attributes only the source carries are destroyed.
    /// The source closes the gap by swap-remove.
    ///
    /// # Safety
    ///
    /// Same pointer contract as [`ArchetypeTable::create_one_with`].
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] / [`StorageError::ForeignIdentity`]
    ///   if `identity` is not stored here
    /// - [`StorageError::AttributeNotInArchetype`] for a value the
    ///   destination has no column for
    /// - [`StorageError::AttributeAlreadyPresent`] for a value of an
    ///   attribute the row already carries
    ///
    /// Nothing changes on error.
    pub(crate) unsafe fn migrate_with(
        &mut self,
        destination: &mut ArchetypeTable,
        identity: Identity,
        index: &mut IdentityIndex,
        values: &[(AttributeId, ValueSource)],
    ) -> StorageResult<usize> {
        let row = self.row_of(identity, index)?;
        destination.check_owned(values.iter().map(|(attribute, _)| *attribute))?;
        if let Some((attribute, _)) = values.iter().find(|(id, _)| self.contains_type(*id)) {
            return Err(StorageError::AttributeAlreadyPresent {
                identity,
                attribute: *attribute,
            });
        }

        let destination_row = destination.len();
        for column in &mut destination.columns {
            let attribute = column.attribute();
            match self.signature.position(attribute) {
                Some(source) => {
                    self.columns[source].swap_remove_into(row, column);
                }
                None => write_value(column, source_for(values, attribute)),
            }
        }
        for column in &mut self.columns {
            if !destination.signature.contains(column.attribute()) {
                column.swap_remove(row);
            }
        }

        self.remove_identity_at(row, index);
        destination.identities.push(identity);
        index.relocate(identity, Location::new(destination.id, destination_row));

        tracing::trace!(
            %identity,
            from = %self.id,
            to = %destination.id,
            "migrated row"
        );
        self.debug_check();
        destination.debug_check();
        Ok(destination_row)
    }

    /// Resolves the row of an identity stored here.
    fn row_of(&self, identity: Identity, index: &IdentityIndex) -> StorageResult<usize> {
        let location = index.locate(identity)?;
        if location.archetype != self.id {
            tracing::warn!(
                %identity,
                archetype = %self.id,
                stored_in = %location.archetype,
                "identity stored in another table"
            );
            return Err(StorageError::ForeignIdentity {
                identity,
                archetype: self.id,
            });
        }
        Ok(location.row())
    }

    /// Swap-removes the identity list entry and re-points the moved identity.
    fn remove_identity_at(&mut self, row: usize, index: &mut IdentityIndex) {
        self.identities.swap_remove(row);
        if let Some(&moved) = self.identities.get(row) {
            index.set_row(moved, row);
        }
    }

    fn check_owned(&self, attributes: impl Iterator<Item = AttributeId>) -> StorageResult<()> {
        for attribute in attributes {
            if !self.contains_type(attribute) {
                tracing::warn!(archetype = %self.id, %attribute, "attribute not in table");
                return Err(StorageError::AttributeNotInArchetype {
                    archetype: self.id,
                    attribute,
                });
            }
        }
        Ok(())
    }

    fn debug_check(&self) {
        debug_assert!(
            self.columns
                .iter()
                .all(|column| column.len() == self.identities.len()),
            "columns of {} out of step with its identity list",
            self.id
        );
    }
}

/// Value access to one table.
///
/// Column contents can be rewritten in place, but rows can be neither
/// added, removed nor reordered, so the identity list stays in step with
/// every column. Reads go through [`Deref`] to [`ArchetypeTable`].
///
/// # Example
///
/// ```rust,ignore
/// let mut table = world.archetype_mut(archetype).unwrap();
/// let (positions, velocities) = table.column_pair_mut::<Position, Velocity>(pos, vel).unwrap();
/// for (p, v) in positions.iter_mut().zip(velocities.iter()) {
///     p.x += v.x;
/// }
/// ```
pub struct ArchetypeTableMut<'a> {
    table: &'a mut ArchetypeTable,
}

impl<'a> ArchetypeTableMut<'a> {
    pub(crate) fn new(table: &'a mut ArchetypeTable) -> Self {
        Self { table }
    }

    /// Returns the values of `attribute` as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the attribute's type.
    pub fn column_slice_mut<T: 'static>(&mut self, attribute: AttributeId) -> Option<&mut [T]> {
        Some(self.table.column_mut(attribute)?.as_mut_slice())
    }

    /// Like [`ArchetypeTableMut::column_slice_mut`], consuming the view.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the attribute's type.
    pub fn into_column_slice_mut<T: 'static>(self, attribute: AttributeId) -> Option<&'a mut [T]> {
        let table = self.table;
        Some(table.column_mut(attribute)?.as_mut_slice())
    }

    /// Returns the values of two distinct attributes as mutable slices.
    ///
    /// `None` if either is missing or both name the same attribute.
    ///
    /// # Panics
    ///
    /// Panics if `A` or `B` is not the matching attribute's type.
    pub fn column_pair_mut<A: 'static, B: 'static>(
        &mut self,
        first: AttributeId,
        second: AttributeId,
    ) -> Option<(&mut [A], &mut [B])> {
        let (a, b) = self.table.column_pair_mut(first, second)?;
        Some((a.as_mut_slice(), b.as_mut_slice()))
    }

    /// Returns begin/end pointers for each requested attribute, in request
    /// order. `None` if any attribute is missing.
    pub fn raw_columns(&mut self, attributes: &[AttributeId]) -> Option<Vec<ColumnSpan>> {
        self.table.raw_columns(attributes)
    }
}

impl Deref for ArchetypeTableMut<'_> {
    type Target = ArchetypeTable;

    fn deref(&self) -> &ArchetypeTable {
        self.table
    }
}

impl fmt::Debug for ArchetypeTableMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.table, f)
    }
}

fn source_for(values: &[(AttributeId, ValueSource)], attribute: AttributeId) -> ValueSource {
    values
        .iter()
        .find(|(id, _)| *id == attribute)
        .map_or(ValueSource::Default, |(_, source)| *source)
}

/// Appends one value to `column`.
///
/// # Safety
///
/// Pointer contract of [`ArchetypeTable::create_one_with`].
unsafe fn write_value(column: &mut Column, source: ValueSource) {
    match source {
        ValueSource::Default => {
            column.push_default();
        }
        ValueSource::Move(src) => {
            column.push_move(src.as_ptr());
        }
        ValueSource::Copy(src) => {
            column.push_copy(src.as_ptr().cast_const());
        }
    }
}

impl fmt::Debug for ArchetypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeTable")
            .field("id", &self.id)
            .field("signature", &self.signature.attributes())
            .field("rows", &self.identities.len())
            .finish()
    }
}
