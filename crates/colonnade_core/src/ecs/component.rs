//! # Attribute Types
//!
//! Attributes are the plain data attached to rows. Each attribute type is
//! registered once with an [`AttributeRegistry`], which hands back a small
//! integer [`AttributeId`] and keeps the type's size, alignment and
//! [`LifecycleVTable`]. Everything downstream keys on the handle.

// SAFETY: Raw registration trusts a caller-built lifecycle table.
#![allow(unsafe_code)]

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::mem;

use super::vtable::LifecycleVTable;
use crate::error::{StorageError, StorageResult};

/// Marker trait for Rust types that can be stored as attributes.
///
/// Default construction backs bulk creation and attribute attachment,
/// `Clone` backs prototype copies. Implemented for every qualifying type.
pub trait Attribute: Default + Clone + Send + Sync + 'static {}

impl<T: Default + Clone + Send + Sync + 'static> Attribute for T {}

/// Handle of a registered attribute type.
///
/// Handles are issued densely from zero in registration order. Signatures
/// are sorted by handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct AttributeId(u32);

impl AttributeId {
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

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attr#{}", self.0)
    }
}

/// Everything a column needs to manage values of one attribute type.
#[derive(Clone, Copy, Debug)]
pub struct AttributeDescriptor {
    /// Registry handle.
    pub id: AttributeId,
    /// Size of one value in bytes. Zero for state-free types.
    pub size: usize,
    /// Alignment of one value in bytes.
    pub align: usize,
    /// Rust type, if the attribute was registered from one.
    pub type_id: Option<TypeId>,
    /// Lifecycle functions.
    pub vtable: LifecycleVTable,
}

impl AttributeDescriptor {
    /// Returns true if values occupy no memory.
    #[inline]
    #[must_use]
    pub const fn is_zero_sized(&self) -> bool {
        self.size == 0
    }
}

/// Registry record for one attribute type.
#[derive(Clone, Debug)]
pub struct AttributeInfo {
    /// Layout and lifecycle.
    pub descriptor: AttributeDescriptor,
    /// Canonical name.
    pub name: String,
    /// 32-bit FNV-1a of the canonical name. Stable within a build.
    pub stable_hash: u32,
}

/// 32-bit FNV-1a hash of a type name.
#[must_use]
pub fn stable_name_hash(name: &str) -> u32 {
    const OFFSET_BASIS: u32 = 2_166_136_261;
    const PRIME: u32 = 16_777_619;

    name.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    })
}

/// Issues handles for attribute types.
///
/// # Example
///
/// ```rust,ignore
/// let mut attributes = AttributeRegistry::new();
/// let position = attributes.register::<Position>();
/// assert_eq!(attributes.register::<Position>(), position);
/// assert_eq!(attributes.info(position).unwrap().descriptor.size, 16);
/// ```
#[derive(Default)]
pub struct AttributeRegistry {
    /// Records indexed by handle.
    infos: Vec<AttributeInfo>,
    /// Rust type to handle.
    by_type: HashMap<TypeId, AttributeId>,
    /// Canonical name to handle.
    by_name: HashMap<String, AttributeId>,
}

impl AttributeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered attribute types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Registers a Rust type, or returns its existing handle.
    pub fn register<T: Attribute>(&mut self) -> AttributeId {
        if let Some(&id) = self.by_type.get(&TypeId::of::<T>()) {
            return id;
        }

        let id = self.next_id();
        let name = type_name::<T>().to_string();
        self.infos.push(AttributeInfo {
            descriptor: AttributeDescriptor {
                id,
                size: mem::size_of::<T>(),
                align: mem::align_of::<T>(),
                type_id: Some(TypeId::of::<T>()),
                vtable: LifecycleVTable::of::<T>(),
            },
            stable_hash: stable_name_hash(&name),
            name: name.clone(),
        });
        self.by_type.insert(TypeId::of::<T>(), id);
        self.by_name.entry(name).or_insert(id);

        tracing::debug!(attribute = %id, name = type_name::<T>(), "registered attribute");
        id
    }

    /// Registers a type known only by its layout and lifecycle table.
    ///
    /// # Safety
    ///
    /// Every function in `vtable` must be sound for values of `size` bytes
    /// aligned to `align`. The values must be safe to send between threads
    /// and to share between them (`Send + Sync`), since columns holding them
    /// are both.
    ///
    /// # Errors
    ///
    /// - [`StorageError::DuplicateAttribute`] if `name` is taken
    /// - [`StorageError::NotRelocatable`] if the table has neither move nor copy
    /// - [`StorageError::InvalidLayout`] if `align` is not a power of two
    pub unsafe fn register_raw(
        &mut self,
        name: &str,
        size: usize,
        align: usize,
        vtable: LifecycleVTable,
    ) -> StorageResult<AttributeId> {
        if self.by_name.contains_key(name) {
            return Err(StorageError::DuplicateAttribute(name.to_string()));
        }
        if !vtable.is_relocatable() {
            return Err(StorageError::NotRelocatable(name.to_string()));
        }
        if !align.is_power_of_two() || size % align != 0 {
            return Err(StorageError::InvalidLayout(name.to_string()));
        }

        let id = self.next_id();
        self.infos.push(AttributeInfo {
            descriptor: AttributeDescriptor {
                id,
                size,
                align,
                type_id: None,
                vtable,
            },
            name: name.to_string(),
            stable_hash: stable_name_hash(name),
        });
        self.by_name.insert(name.to_string(), id);

        tracing::debug!(attribute = %id, name, "registered raw attribute");
        Ok(id)
    }

    /// Returns the handle of a registered Rust type.
    #[inline]
    #[must_use]
    pub fn id_of<T: 'static>(&self) -> Option<AttributeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the handle registered under a canonical name.
    #[must_use]
    pub fn id_by_name(&self, name: &str) -> Option<AttributeId> {
        self.by_name.get(name).copied()
    }

    /// Returns the record for a handle.
    #[inline]
    #[must_use]
    pub fn info(&self, id: AttributeId) -> Option<&AttributeInfo> {
        self.infos.get(id.index())
    }

    /// Returns the layout and lifecycle for a handle.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownAttribute`] for a foreign handle.
    pub fn descriptor(&self, id: AttributeId) -> StorageResult<AttributeDescriptor> {
        self.info(id)
            .map(|info| info.descriptor)
            .ok_or(StorageError::UnknownAttribute(id))
    }

    /// Iterates over all records in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.infos.iter()
    }

    fn next_id(&self) -> AttributeId {
        let raw = u32::try_from(self.infos.len()).unwrap_or_else(|_| panic!("attribute handles exhausted"));
        AttributeId(raw)
    }
}
