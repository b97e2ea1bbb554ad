//! # Entity Component System
//!
//! Archetype-based row storage with type-erased columns.
//!
//! ## Design Philosophy
//!
//! - Rows with the same attribute set share a table; each attribute is one
//!   contiguous column
//! - Columns know their element type only through a lifecycle table
//! - Identities are dense, monotonic and never reused
//! - Removal is swap-remove, attachment and detachment are migrations
//! - No global state: the registry is an owned value

pub mod archetype;
mod bundle;
mod component;
mod entity;
mod query_tree;
mod registry;
mod storage;
mod vtable;
mod world;

pub use archetype::{
    fingerprint, ArchetypeId, ArchetypeSignature, ArchetypeTable, ArchetypeTableMut, ColumnSpan,
    ValueSource,
};
pub use bundle::Bundle;
pub use component::{
    stable_name_hash, Attribute, AttributeDescriptor, AttributeId, AttributeInfo,
    AttributeRegistry,
};
pub use entity::{Identity, IdentityIndex, IdentityRange, Location};
pub use query_tree::SortedKeyTree;
pub use registry::ArchetypeRegistry;
pub use storage::Column;
pub use vtable::{CopyFn, DefaultFn, DestroyFn, LifecycleVTable, MoveFn};
pub use world::World;
