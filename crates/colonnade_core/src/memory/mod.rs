//! # Memory Management
//!
//! Pooled block allocation for column buffers.
//!
//! ## Design Philosophy
//!
//! Columns of one attribute type live in many archetypes and grow through
//! the same power-of-two sizes:
//! - One pool per attribute type, shared by all of its columns
//! - Released blocks are recycled by exact size
//! - Oversized blocks go straight back to the global allocator

mod pool;

pub use pool::{BlockPool, SharedPool};
