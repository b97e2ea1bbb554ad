//! # World
//!
//! Typed front door to the store. Attribute types are registered on first
//! use and values travel as [`Bundle`]s. Everything below is the untyped
//! [`ArchetypeRegistry`], reachable through [`World::registry_mut`].

// SAFETY: Bundle pointers are forwarded to the registry together with the
// handles the bundle registered for them.
#![allow(unsafe_code)]

use std::any::type_name;

use super::archetype::{
    ArchetypeId, ArchetypeSignature, ArchetypeTable, ArchetypeTableMut, ValueSource,
};
use super::bundle::Bundle;
use super::component::{Attribute, AttributeId};
use super::entity::{Identity, IdentityRange};
use super::registry::ArchetypeRegistry;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// The store - every row, table and attribute type.
///
/// # Example
///
/// ```rust,ignore
/// let mut world = World::new();
///
/// let id = world.create((Position::new(4.0, 2.0, 0.0), Velocity::new(1.0, 0.0, 0.0)))?;
/// world.get_mut::<Position>(id)?.x += 1.0;
///
/// for archetype in world.query::<(Position, Velocity)>() {
///     let positions = world.column::<Position>(archetype).unwrap();
///     // ...
/// }
/// ```
#[derive(Default)]
pub struct World {
    /// Untyped storage.
    registry: ArchetypeRegistry,
}

impl World {
    /// Creates an empty world with default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty world.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidConfig`] if `config` fails validation.
    pub fn with_config(config: StorageConfig) -> StorageResult<Self> {
        Ok(Self {
            registry: ArchetypeRegistry::with_config(config)?,
        })
    }

    /// Returns the untyped registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &ArchetypeRegistry {
        &self.registry
    }

    /// Returns the untyped registry mutably.
    #[inline]
    pub fn registry_mut(&mut self) -> &mut ArchetypeRegistry {
        &mut self.registry
    }

    /// Registers an attribute type, or returns its existing handle.
    pub fn register<T: Attribute>(&mut self) -> AttributeId {
        self.registry.attributes_mut().register::<T>()
    }

    /// Returns the handle of a registered attribute type.
    #[inline]
    #[must_use]
    pub fn attribute_id<T: Attribute>(&self) -> Option<AttributeId> {
        self.registry.attributes().id_of::<T>()
    }

    /// Returns the number of live rows.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.registry.len()
    }

    /// Checks if no row is alive.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Checks if `identity` is alive.
    #[inline]
    #[must_use]
    pub fn contains(&self, identity: Identity) -> bool {
        self.registry.contains(identity)
    }

    /// Creates a row holding `values`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateAttribute`] if the bundle repeats a type
    /// - [`StorageError::IdentitiesExhausted`] if no identity is left
    pub fn create<B: Bundle>(&mut self, values: B) -> StorageResult<Identity> {
        let ids = B::register(self.registry.attributes_mut());
        let archetype = self.registry.archetype_for(&ids)?;
        let registry = &mut self.registry;
        values.with_moved(|pointers| {
            let sources: Vec<_> = ids
                .iter()
                .zip(pointers)
                .map(|(&id, &ptr)| (id, ValueSource::Move(ptr)))
                .collect();
            // SAFETY: pointer i holds a value of attribute ids[i]
            unsafe { registry.create_with(archetype, &sources) }
        })
    }

    /// Creates a row with default values for the bundle's types.
    ///
    /// # Errors
    ///
    /// Same as [`World::create`].
    pub fn create_default<B: Bundle>(&mut self) -> StorageResult<Identity> {
        let archetype = self.archetype_of::<B>()?;
        self.registry.create(archetype)
    }

    /// Creates `count` rows with default values for the bundle's types.
    ///
    /// # Errors
    ///
    /// Same as [`World::create`].
    pub fn create_many<B: Bundle>(&mut self, count: usize) -> StorageResult<IdentityRange> {
        let archetype = self.archetype_of::<B>()?;
        self.registry.create_many(archetype, count)
    }

    /// Creates `count` rows, each a copy of `prototype`.
    ///
    /// # Errors
    ///
    /// Same as [`World::create`].
    pub fn create_many_cloned<B: Bundle>(
        &mut self,
        count: usize,
        prototype: &B,
    ) -> StorageResult<IdentityRange> {
        let ids = B::register(self.registry.attributes_mut());
        let archetype = self.registry.archetype_for(&ids)?;
        let registry = &mut self.registry;
        prototype.with_borrowed(|pointers| {
            let prototypes: Vec<_> = ids.iter().copied().zip(pointers.iter().copied()).collect();
            // SAFETY: pointer i holds a value of attribute ids[i]
            unsafe { registry.create_many_cloned(archetype, count, &prototypes) }
        })
    }

    /// Creates `count` copies of an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadIdentity`] if `prototype` is not alive.
    pub fn create_many_from(
        &mut self,
        count: usize,
        prototype: Identity,
    ) -> StorageResult<IdentityRange> {
        self.registry.create_many_from(count, prototype)
    }

    /// Destroys a row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::DeadIdentity`] if `identity` is not alive.
    pub fn destroy(&mut self, identity: Identity) -> StorageResult<()> {
        self.registry.destroy(identity)
    }

    /// Returns one attribute of a row.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::UnregisteredAttribute`] if `T` was never registered
    /// - [`StorageError::MissingAttribute`] if the row lacks `T`
    pub fn get<T: Attribute>(&self, identity: Identity) -> StorageResult<&T> {
        let attribute = self.require::<T>()?;
        let location = self.registry.location(identity)?;
        self.registry
            .archetype(location.archetype)
            .and_then(|table| table.column(attribute))
            .and_then(|column| column.get::<T>(location.row()))
            .ok_or_else(|| missing(identity, attribute))
    }

    /// Returns one attribute of a row mutably.
    ///
    /// # Errors
    ///
    /// Same as [`World::get`].
    pub fn get_mut<T: Attribute>(&mut self, identity: Identity) -> StorageResult<&mut T> {
        let attribute = self.require::<T>()?;
        let location = self.registry.location(identity)?;
        self.registry
            .archetype_mut(location.archetype)
            .and_then(|table| table.into_column_slice_mut::<T>(attribute))
            .and_then(|values| values.get_mut(location.row()))
            .ok_or_else(|| missing(identity, attribute))
    }

    /// Checks if a live row carries `T`.
    #[must_use]
    pub fn has<T: Attribute>(&self, identity: Identity) -> bool {
        let Some(attribute) = self.attribute_id::<T>() else {
            return false;
        };
        self.registry
            .identities()
            .get(identity)
            .and_then(|location| self.registry.archetype(location.archetype))
            .is_some_and(|table| table.contains_type(attribute))
    }

    /// Attaches the bundle's values to a row.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::AttributeAlreadyPresent`] if the row has one already
    /// - [`StorageError::DuplicateAttribute`] if the bundle repeats a type
    ///
    /// Nothing changes on error.
    pub fn add_attributes<B: Bundle>(&mut self, identity: Identity, values: B) -> StorageResult<()> {
        let ids = B::register(self.registry.attributes_mut());
        self.check_addable(identity, &ids)?;

        let registry = &mut self.registry;
        values.with_moved(|pointers| {
            let sources: Vec<_> = ids
                .iter()
                .zip(pointers)
                .map(|(&id, &ptr)| (id, ValueSource::Move(ptr)))
                .collect();
            // SAFETY: pointer i holds a value of attribute ids[i]
            unsafe { registry.add_attributes_with(identity, &sources) }
        })?;
        Ok(())
    }

    /// Attaches default values of the bundle's types to a row.
    ///
    /// # Errors
    ///
    /// Same as [`World::add_attributes`].
    pub fn add_default_attributes<B: Bundle>(&mut self, identity: Identity) -> StorageResult<()> {
        let ids = B::register(self.registry.attributes_mut());
        self.registry.add_attributes(identity, &ids)?;
        Ok(())
    }

    /// Detaches `T` from a row, destroying its value.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DeadIdentity`] if `identity` is not alive
    /// - [`StorageError::UnregisteredAttribute`] if `T` was never registered
    /// - [`StorageError::MissingAttribute`] if the row lacks `T`
    pub fn remove_attribute<T: Attribute>(&mut self, identity: Identity) -> StorageResult<()> {
        let attribute = self.require::<T>()?;
        self.registry.remove_attribute(identity, attribute)?;
        Ok(())
    }

    /// Returns every table whose rows carry at least the bundle's types.
    #[must_use]
    pub fn query<B: Bundle>(&self) -> Vec<ArchetypeId> {
        B::lookup(self.registry.attributes())
            .map(|ids| self.registry.archetypes_matching(&ids))
            .unwrap_or_default()
    }

    /// Returns a table.
    #[inline]
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&ArchetypeTable> {
        self.registry.archetype(id)
    }

    /// Returns value access to a table.
    #[inline]
    pub fn archetype_mut(&mut self, id: ArchetypeId) -> Option<ArchetypeTableMut<'_>> {
        self.registry.archetype_mut(id)
    }

    /// Returns the `T` column of a table as a slice.
    #[must_use]
    pub fn column<T: Attribute>(&self, archetype: ArchetypeId) -> Option<&[T]> {
        let attribute = self.attribute_id::<T>()?;
        Some(self.archetype(archetype)?.column(attribute)?.as_slice())
    }

    /// Returns the `T` column of a table as a mutable slice.
    pub fn column_mut<T: Attribute>(&mut self, archetype: ArchetypeId) -> Option<&mut [T]> {
        let attribute = self.attribute_id::<T>()?;
        self.archetype_mut(archetype)?.into_column_slice_mut(attribute)
    }

    fn archetype_of<B: Bundle>(&mut self) -> StorageResult<ArchetypeId> {
        let ids = B::register(self.registry.attributes_mut());
        self.registry.archetype_for(&ids)
    }

    fn require<T: Attribute>(&self) -> StorageResult<AttributeId> {
        self.attribute_id::<T>().ok_or_else(|| {
            tracing::warn!(attribute = type_name::<T>(), "attribute type never registered");
            StorageError::UnregisteredAttribute(type_name::<T>().to_string())
        })
    }

    fn check_addable(&self, identity: Identity, ids: &[AttributeId]) -> StorageResult<()> {
        ArchetypeSignature::try_new(ids)?;
        let location = self.registry.location(identity)?;
        if let Some(table) = self.registry.archetype(location.archetype) {
            if let Some(&attribute) = ids.iter().find(|&&id| table.contains_type(id)) {
                tracing::warn!(%identity, %attribute, "attribute already present");
                return Err(StorageError::AttributeAlreadyPresent {
                    identity,
                    attribute,
                });
            }
        }
        Ok(())
    }
}

fn missing(identity: Identity, attribute: AttributeId) -> StorageError {
    tracing::warn!(%identity, %attribute, "attribute not present");
    StorageError::MissingAttribute {
        identity,
        attribute,
    }
}
