//! # Block Pool
//!
//! Recycler for the raw byte blocks backing columns of one attribute type.

// SAFETY: The pool hands out and takes back raw allocations.
// Every block it returns was produced by the global allocator with the
// pool's alignment and the exact byte size recorded by the caller.
#![allow(unsafe_code)]

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

/// A pool shared by every column of one attribute type.
pub type SharedPool = Arc<Mutex<BlockPool>>;

/// A recycler for raw byte blocks of a fixed alignment.
///
/// Columns grow by powers of two, so the same handful of block sizes come
/// and go all the time. Released blocks up to `max_block_bytes` are parked
/// in a free list per exact size and handed out again on the next request
/// of that size. Larger blocks bypass the pool.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Share it through [`SharedPool`].
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = BlockPool::new(4, 4096, 64);
///
/// let block = pool.allocate(256);
/// unsafe { pool.release(block, 256) };
///
/// // Same size again - served from the free list
/// let again = pool.allocate(256);
/// assert_eq!(pool.reuses(), 1);
/// ```
pub struct BlockPool {
    /// Alignment of every block.
    align: usize,
    /// Largest block kept for reuse.
    max_block_bytes: usize,
    /// Cap on cached blocks per size.
    max_cached_blocks: usize,
    /// Free lists keyed by exact byte size.
    free_lists: HashMap<usize, Vec<NonNull<u8>>>,
    /// Blocks obtained from the global allocator.
    allocations: u64,
    /// Blocks served from a free list.
    reuses: u64,
}

impl BlockPool {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `align` - Alignment of every block, a power of two
    /// * `max_block_bytes` - Largest block kept for reuse
    /// * `max_cached_blocks` - Cap on cached blocks per size
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[must_use]
    pub fn new(align: usize, max_block_bytes: usize, max_cached_blocks: usize) -> Self {
        assert!(align.is_power_of_two(), "Alignment must be a power of two");
        Self {
            align,
            max_block_bytes,
            max_cached_blocks,
            free_lists: HashMap::new(),
            allocations: 0,
            reuses: 0,
        }
    }

    /// Creates a pool wrapped for sharing between columns.
    #[must_use]
    pub fn shared(align: usize, max_block_bytes: usize, max_cached_blocks: usize) -> SharedPool {
        Arc::new(Mutex::new(Self::new(align, max_block_bytes, max_cached_blocks)))
    }

    /// Returns the alignment of every block.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Returns how many blocks came from the global allocator.
    #[inline]
    #[must_use]
    pub const fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Returns how many requests were served from a free list.
    #[inline]
    #[must_use]
    pub const fn reuses(&self) -> u64 {
        self.reuses
    }

    /// Returns the number of blocks currently parked for reuse.
    #[must_use]
    pub fn cached_blocks(&self) -> usize {
        self.free_lists.values().map(Vec::len).sum()
    }

    /// Obtains a block of exactly `bytes` bytes.
    ///
    /// The block is uninitialized. Aborts the process if the global
    /// allocator fails.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero or overflows a valid layout.
    pub fn allocate(&mut self, bytes: usize) -> NonNull<u8> {
        assert!(bytes > 0, "Zero-sized blocks are never allocated");

        if let Some(block) = self.free_lists.get_mut(&bytes).and_then(Vec::pop) {
            self.reuses += 1;
            tracing::trace!(bytes, "pool block reused");
            return block;
        }

        let layout = self.layout(bytes);
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc(layout) };
        let Some(block) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };
        self.allocations += 1;
        block
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// `block` must have come from [`BlockPool::allocate`] on this pool with
    /// the same `bytes`, and must not be used afterwards.
    pub unsafe fn release(&mut self, block: NonNull<u8>, bytes: usize) {
        if bytes <= self.max_block_bytes {
            let list = self.free_lists.entry(bytes).or_default();
            if list.len() < self.max_cached_blocks {
                list.push(block);
                return;
            }
        }
        // SAFETY: caller guarantees the block was allocated with this layout
        unsafe { dealloc(block.as_ptr(), self.layout(bytes)) };
    }

    /// Frees every cached block back to the global allocator.
    pub fn clear(&mut self) {
        let align = self.align;
        for (bytes, list) in self.free_lists.drain() {
            let layout = Layout::from_size_align(bytes, align)
                .unwrap_or_else(|_| panic!("capacity overflow"));
            for block in list {
                // SAFETY: every cached block was allocated with this layout
                unsafe { dealloc(block.as_ptr(), layout) };
            }
        }
    }

    fn layout(&self, bytes: usize) -> Layout {
        Layout::from_size_align(bytes, self.align).unwrap_or_else(|_| panic!("capacity overflow"))
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        self.clear();
    }
}

// SAFETY: BlockPool exclusively owns the cached blocks it holds
unsafe impl Send for BlockPool {}
