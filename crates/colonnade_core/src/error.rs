//! Error types for the storage engine.

use thiserror::Error;

use crate::ecs::{ArchetypeId, AttributeId, Identity};

/// Storage errors.
///
/// Every contract violation a caller can commit against the store surfaces
/// as one of these variants. Nothing is silently ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Identity was never issued or has already been released.
    #[error("identity {0} is not alive")]
    DeadIdentity(Identity),

    /// Identity is alive but stored in a different archetype.
    #[error("identity {identity} is not stored in archetype {archetype}")]
    ForeignIdentity {
        /// Row that was asked.
        identity: Identity,
        /// Archetype that was asked.
        archetype: ArchetypeId,
    },

    /// The row does not carry the requested attribute.
    #[error("identity {identity} has no attribute {attribute}")]
    MissingAttribute {
        /// Row that was asked.
        identity: Identity,
        /// Attribute that was requested.
        attribute: AttributeId,
    },

    /// The row already carries an attribute that was being added.
    #[error("identity {identity} already has attribute {attribute}")]
    AttributeAlreadyPresent {
        /// Row that was asked.
        identity: Identity,
        /// Attribute that was being added.
        attribute: AttributeId,
    },

    /// A value was supplied for a column the archetype does not own.
    #[error("archetype {archetype} has no column for attribute {attribute}")]
    AttributeNotInArchetype {
        /// Target archetype.
        archetype: ArchetypeId,
        /// Offending attribute.
        attribute: AttributeId,
    },

    /// Attribute listed twice in one signature, or a name registered twice.
    #[error("duplicate attribute: {0}")]
    DuplicateAttribute(String),

    /// Type was never registered with the attribute registry.
    #[error("attribute type not registered: {0}")]
    UnregisteredAttribute(String),

    /// Size and alignment do not form a valid element layout.
    #[error("invalid layout for attribute {0}")]
    InvalidLayout(String),

    /// Handle does not name a registered attribute.
    #[error("unknown attribute handle: {0}")]
    UnknownAttribute(AttributeId),

    /// Lifecycle table offers neither a move nor a copy function.
    #[error("attribute {0} can be neither moved nor copied")]
    NotRelocatable(String),

    /// Handle does not name an archetype in this registry.
    #[error("unknown archetype: {0}")]
    UnknownArchetype(ArchetypeId),

    /// The 32-bit identity space is used up.
    #[error("identity space exhausted")]
    IdentitiesExhausted,

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
