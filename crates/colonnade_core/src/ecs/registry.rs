//! # Archetype Registry
//!
//! Owns every archetype table and the identity index, resolves attribute
//! sets to tables, and answers superset queries.
//!
//! ## Lookup
//!
//! - Exact: fingerprint bucket, then full signature comparison. Two sets
//!   sharing a fingerprint simply share a bucket.
//! - Superset: [`SortedKeyTree`] keyed by each table's sorted signature.
//!
//! Tables are created lazily and live as long as the registry.

// SAFETY: Forwards caller-supplied value pointers to the tables.
#![allow(unsafe_code)]

use std::collections::HashMap;
use std::ptr::NonNull;

use super::archetype::{
    ArchetypeId, ArchetypeSignature, ArchetypeTable, ArchetypeTableMut, ValueSource,
};
use super::component::{AttributeDescriptor, AttributeId, AttributeRegistry};
use super::entity::{Identity, IdentityIndex, IdentityRange, Location};
use super::query_tree::SortedKeyTree;
use super::storage::Column;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::memory::{BlockPool, SharedPool};

/// Owner of all archetype tables.
///
/// # Example
///
/// ```rust,ignore
/// let mut registry = ArchetypeRegistry::new();
/// let a = registry.attributes_mut().register::<Position>();
/// let b = registry.attributes_mut().register::<Velocity>();
///
/// let table = registry.archetype_for(&[b, a])?;
/// let id = registry.create(table)?;
/// registry.remove_attribute(id, b)?;
///
/// assert_eq!(registry.archetypes_matching(&[a]).len(), 2);
/// ```
pub struct ArchetypeRegistry {
    /// Tuning.
    config: StorageConfig,
    /// Attribute types.
    attributes: AttributeRegistry,
    /// Tables indexed by [`ArchetypeId`].
    archetypes: Vec<ArchetypeTable>,
    /// Fingerprint to every table with that fingerprint.
    by_fingerprint: HashMap<u32, Vec<ArchetypeId>>,
    /// Sorted signature to table, for superset queries.
    query_tree: SortedKeyTree<AttributeId, ArchetypeId>,
    /// Shared block pool per attribute type.
    pools: HashMap<AttributeId, SharedPool>,
    /// Identity allocator and sparse index.
    index: IdentityIndex,
}

impl Default for ArchetypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeRegistry {
    /// Creates an empty registry with default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::build(StorageConfig::default())
    }

    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(config: StorageConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StorageConfig) -> Self {
        Self {
            index: IdentityIndex::with_capacity(config.identity_reserve),
            config,
            attributes: AttributeRegistry::new(),
            archetypes: Vec::new(),
            by_fingerprint: HashMap::new(),
            query_tree: SortedKeyTree::new(),
            pools: HashMap::new(),
        }
    }

    /// Returns the tuning in effect.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns the attribute registry.
    #[inline]
    #[must_use]
    pub const fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    /// Returns the attribute registry for registration.
    #[inline]
    pub fn attributes_mut(&mut self) -> &mut AttributeRegistry {
        &mut self.attributes
    }

    /// Returns the identity index.
    #[inline]
    #[must_use]
    pub const fn identities(&self) -> &IdentityIndex {
        &self.index
    }

    /// Returns the number of live rows across all tables.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.index.len()
    }

    /// Checks if no row is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the number of tables.
    #[inline]
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.archetypes.len()
    }

    /// Iterates over all tables in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &ArchetypeTable> {
        self.archetypes.iter()
    }

    /// Returns a table.
    #[inline]
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeTable> {
        self.archetypes.get(id.index())
    }

    /// Returns value access to a table.
    ///
    /// Rows themselves only change through the registry.
    #[inline]
    pub fn archetype_mut(&mut self, id: ArchetypeId) -> Option<ArchetypeTableMut<'_>> {
        self.archetypes.get_mut(id.index()).map(ArchetypeTableMut::new)
    }

    /// Checks if `identity` is alive.
    #[inline]
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.index.contains(identity)
    }

    /// Resolves a live identity to its table and row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadIdentity`] if `identity` is not alive.
    pub fn location(&self, identity: Identity) -> StorageResult<Location> {
        self.index.locate(identity).map_err(|err| {
            tracing::warn!(%identity, "access to dead identity");
            err
        })
    }

    /// Returns the table holding exactly these attributes, if it exists.
    #[must_use]
    pub fn find(&self, signature: &ArchetypeSignature) -> Option<ArchetypeId> {
        self.by_fingerprint
            .get(&signature.fingerprint())?
            .iter()
            .copied()
            .find(|id| self.archetypes[id.index()].signature() == signature)
    }

    /// Returns the table holding exactly these attributes, creating it on
    /// first request. Order does not matter.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateAttribute`] if an attribute is listed twice
    /// - [`StorageError::UnknownAttribute`] for an unregistered handle
    pub fn archetype_for(&mut self, attributes: &[AttributeId]) -> StorageResult<ArchetypeId> {
        let signature = ArchetypeSignature::try_new(attributes)?;
        self.archetype_for_signature(signature)
    }

    /// Returns every table whose attributes include all of `attributes`.
    ///
    /// Order and duplicates in the request do not matter. An empty request
    /// returns every table.
    #[must_use]
    pub fn archetypes_matching(&self, attributes: &[AttributeId]) -> Vec<ArchetypeId> {
        self.query_tree.supersets(attributes)
    }

    /// Reserves room for `additional` rows in a table.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownArchetype`] for a foreign handle.
    pub fn reserve(&mut self, archetype: ArchetypeId, additional: usize) -> StorageResult<()> {
        self.table_mut(archetype)?.reserve(additional);
        self.index.reserve(additional);
        Ok(())
    }

    /// Creates one default-constructed row.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownArchetype`] for a foreign handle
    /// - [`StorageError::IdentitiesExhausted`] if no identity is left
    pub fn create(&mut self, archetype: ArchetypeId) -> StorageResult<Identity> {
        let table = Self::table_in(&mut self.archetypes, archetype)?;
        table.create_one(&mut self.index)
    }

    /// Creates one row with per-attribute value sources.
    ///
    /// # Safety
    ///
    /// Every `Move`/`Copy` pointer must hold a live value of the listed
    /// attribute's type, outside the registry. Moved-from values must not be
    /// dropped by the caller afterwards.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownArchetype`] for a foreign handle
    /// - [`StorageError::AttributeNotInArchetype`] for a listed attribute the
    ///   table does not carry
    /// - [`StorageError::IdentitiesExhausted`] if no identity is left
    ///
    /// Nothing is written on error.
    pub unsafe fn create_with(
        &mut self,
        archetype: ArchetypeId,
        values: &[(AttributeId, ValueSource)],
    ) -> StorageResult<Identity> {
        let table = Self::table_in(&mut self.archetypes, archetype)?;
        table.create_one_with(&mut self.index, values)
    }

    /// Creates `count` default-constructed rows.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownArchetype`] for a foreign handle
    /// - [`StorageError::IdentitiesExhausted`] if the run does not fit
    pub fn create_many(
        &mut self,
        archetype: ArchetypeId,
        count: usize,
    ) -> StorageResult<IdentityRange> {
        let table = Self::table_in(&mut self.archetypes, archetype)?;
        table.create_many(count, &mut self.index)
    }

    /// Creates `count` rows copied from prototype values.
    ///
    /// # Safety
    ///
    /// Every pointer must hold a live value of the listed attribute's type,
    /// outside the registry.
    ///
    /// # Errors
    ///
    /// Same as [`ArchetypeRegistry::create_with`].
    pub unsafe fn create_many_cloned(
        &mut self,
        archetype: ArchetypeId,
        count: usize,
        prototypes: &[(AttributeId, NonNull<u8>)],
    ) -> StorageResult<IdentityRange> {
        let table = Self::table_in(&mut self.archetypes, archetype)?;
        table.create_many_cloned(count, &mut self.index, prototypes)
    }

    /// Creates `count` copies of an existing row in its own table.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `prototype` is not alive
    /// - [`StorageError::IdentitiesExhausted`] if the run does not fit
    pub fn create_many_from(
        &mut self,
        count: usize,
        prototype: Identity,
    ) -> StorageResult<IdentityRange> {
        let location = self.location(prototype)?;
        let table = Self::table_in(&mut self.archetypes, location.archetype)?;
        table.create_many_from(count, prototype, &mut self.index)
    }

    /// Destroys a row and releases its identity.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadIdentity`] if `identity` is not alive.
    pub fn destroy(&mut self, identity: Identity) -> StorageResult<()> {
        let location = self.location(identity)?;
        let table = Self::table_in(&mut self.archetypes, location.archetype)?;
        table.remove(identity, &mut self.index)
    }

    /// Returns a pointer to one attribute of one row.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::MissingAttribute`] if the row lacks `attribute`
    pub fn get_raw(&self, identity: Identity, attribute: AttributeId) -> StorageResult<NonNull<u8>> {
        let location = self.location(identity)?;
        self.archetypes[location.archetype.index()]
            .get_raw(attribute, location.row())
            .ok_or_else(|| missing(identity, attribute))
    }

    /// Attaches default-constructed attributes to a row.
    ///
    /// The row migrates to the table for the enlarged attribute set.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::AttributeAlreadyPresent`] if the row has one already
    /// - [`StorageError::DuplicateAttribute`] if one is listed twice
    /// - [`StorageError::UnknownAttribute`] for an unregistered handle
    pub fn add_attributes(
        &mut self,
        identity: Identity,
        attributes: &[AttributeId],
    ) -> StorageResult<Location> {
        let values: Vec<_> = attributes
            .iter()
            .map(|&attribute| (attribute, ValueSource::Default))
            .collect();
        // SAFETY: only default sources
        unsafe { self.add_attributes_with(identity, &values) }
    }

    /// Attaches attributes with per-attribute value sources.
    ///
    /// # Safety
    ///
    /// Pointer contract of [`ArchetypeRegistry::create_with`].
    ///
    /// # Errors
    ///
    /// See [`ArchetypeRegistry::add_attributes`]. Nothing changes on error.
    pub unsafe fn add_attributes_with(
        &mut self,
        identity: Identity,
        values: &[(AttributeId, ValueSource)],
    ) -> StorageResult<Location> {
        let location = self.location(identity)?;
        let added: Vec<_> = values.iter().map(|(attribute, _)| *attribute).collect();
        ArchetypeSignature::try_new(&added)?;

        let source_signature = self.archetypes[location.archetype.index()].signature();
        if let Some(&attribute) = added.iter().find(|&&id| source_signature.contains(id)) {
            tracing::warn!(%identity, %attribute, "attribute already present");
            return Err(StorageError::AttributeAlreadyPresent {
                identity,
                attribute,
            });
        }
        if added.is_empty() {
            return Ok(location);
        }

        let signature = source_signature.with(&added);
        let destination = self.archetype_for_signature(signature)?;
        self.migrate(location.archetype, destination, identity, values)
    }

    /// Detaches one attribute from a row.
    ///
    /// The row migrates to the table for the reduced attribute set and the
    /// attribute's value is destroyed.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::MissingAttribute`] if the row lacks `attribute`
    pub fn remove_attribute(
        &mut self,
        identity: Identity,
        attribute: AttributeId,
    ) -> StorageResult<Location> {
        let location = self.location(identity)?;
        let source_signature = self.archetypes[location.archetype.index()].signature();
        if !source_signature.contains(attribute) {
            tracing::warn!(%identity, %attribute, "attribute not present");
            return Err(missing(identity, attribute));
        }

        let signature = source_signature.without(attribute);
        let destination = self.archetype_for_signature(signature)?;
        let (from, to) = pair_mut(&mut self.archetypes, location.archetype, destination);
        let row = from.migrate(to, identity, &mut self.index)?;
        Ok(Location::new(destination, row))
    }

    /// Resolves or creates the table for a signature.
    fn archetype_for_signature(
        &mut self,
        signature: ArchetypeSignature,
    ) -> StorageResult<ArchetypeId> {
        if let Some(id) = self.find(&signature) {
            return Ok(id);
        }
        self.create_archetype(signature)
    }

    fn create_archetype(&mut self, signature: ArchetypeSignature) -> StorageResult<ArchetypeId> {
        let descriptors = signature
            .attributes()
            .iter()
            .map(|&attribute| self.attributes.descriptor(attribute))
            .collect::<StorageResult<Vec<_>>>()?;

        let raw = u32::try_from(self.archetypes.len())
            .ok()
            .filter(|&raw| raw != ArchetypeId::NULL.raw())
            .unwrap_or_else(|| panic!("archetype handles exhausted"));
        let id = ArchetypeId::from_raw(raw);

        let columns = descriptors
            .into_iter()
            .map(|descriptor| {
                let mut column = Column::new(
                    descriptor,
                    self.pool_for(&descriptor),
                    self.config.min_column_capacity,
                );
                column.reserve(self.config.column_pre_reserve);
                column
            })
            .collect();

        let bucket = self.by_fingerprint.entry(signature.fingerprint()).or_default();
        bucket.push(id);
        if bucket.len() > 1 {
            tracing::debug!(
                fingerprint = signature.fingerprint(),
                tables = bucket.len(),
                "fingerprint shared by distinct signatures"
            );
        }
        self.query_tree.insert(signature.attributes(), id);

        tracing::debug!(
            archetype = %id,
            attributes = signature.len(),
            fingerprint = signature.fingerprint(),
            "created archetype"
        );
        self.archetypes.push(ArchetypeTable::new(id, signature, columns));
        Ok(id)
    }

    fn pool_for(&mut self, descriptor: &AttributeDescriptor) -> SharedPool {
        let config = &self.config;
        let make = || {
            BlockPool::shared(
                descriptor.align,
                config.pool_max_block_bytes,
                config.pool_max_cached_blocks,
            )
        };
        if config.pooled_columns {
            self.pools.entry(descriptor.id).or_insert_with(make).clone()
        } else {
            make()
        }
    }

    /// Moves a row between two distinct tables.
    unsafe fn migrate(
        &mut self,
        source: ArchetypeId,
        destination: ArchetypeId,
        identity: Identity,
        values: &[(AttributeId, ValueSource)],
    ) -> StorageResult<Location> {
        let (from, to) = pair_mut(&mut self.archetypes, source, destination);
        let row = from.migrate_with(to, identity, &mut self.index, values)?;
        Ok(Location::new(destination, row))
    }

    fn table_mut(&mut self, id: ArchetypeId) -> StorageResult<&mut ArchetypeTable> {
        Self::table_in(&mut self.archetypes, id)
    }

    fn table_in(
        archetypes: &mut [ArchetypeTable],
        id: ArchetypeId,
    ) -> StorageResult<&mut ArchetypeTable> {
        archetypes
            .get_mut(id.index())
            .ok_or(StorageError::UnknownArchetype(id))
    }
}

fn missing(identity: Identity, attribute: AttributeId) -> StorageError {
    StorageError::MissingAttribute {
        identity,
        attribute,
    }
}

/// Borrows two distinct tables mutably.
fn pair_mut(
    archetypes: &mut [ArchetypeTable],
    a: ArchetypeId,
    b: ArchetypeId,
) -> (&mut ArchetypeTable, &mut ArchetypeTable) {
    let (a, b) = (a.index(), b.index());
    assert_ne!(a, b, "migration needs two distinct tables");
    if a < b {
        let (head, tail) = archetypes.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = archetypes.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
