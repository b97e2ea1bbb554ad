//! # COLONNADE Core Engine
//!
//! In-memory archetype storage for entities and their attributes:
//! - Rows grouped into tables by their exact attribute set
//! - One densely packed column per attribute per table
//! - Superset queries that visit only matching tables
//!
//! ## Architecture Rules
//!
//! 1. **Columns are type-erased** - Element handling goes through per-type lifecycle tables
//! 2. **Identities are never reused** - A released identity stays dead
//! 3. **Contract violations are reported** - Every misuse surfaces as a [`StorageError`]
//! 4. **Rows change only through the registry** - Tables handed out mutably allow value access only
//!
//! ## Example
//!
//! ```rust,ignore
//! use colonnade_core::World;
//!
//! let mut world = World::new();
//! let id = world.create((Position::new(4.0, 2.0, 0.0), Velocity::new(1.0, 0.0, 0.0)))?;
//!
//! for archetype in world.query::<(Position, Velocity)>() {
//!     // walk the columns of every matching table
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod ecs;
pub mod error;
pub mod memory;

pub use config::StorageConfig;
pub use ecs::{
    ArchetypeId, ArchetypeRegistry, ArchetypeSignature, ArchetypeTable, ArchetypeTableMut,
    Attribute, AttributeId, AttributeRegistry, Bundle, Column, Identity, IdentityIndex, IdentityRange, LifecycleVTable,
    Location, SortedKeyTree, ValueSource, World,
};
pub use error::{StorageError, StorageResult};
pub use memory::{BlockPool, SharedPool};
