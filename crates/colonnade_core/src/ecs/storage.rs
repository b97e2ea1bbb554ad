//! # Column Storage
//!
//! A [`Column`] is a growable contiguous buffer of values of one attribute
//! type. It never knows that type: construction, relocation and
//! destruction all go through the attribute's [`LifecycleVTable`].
//!
//! ## Layout
//!
//! ```text
//! data                     data + len * size        data + capacity * size
//!  |  live elements [0, len)  |  uninitialized capacity  |
//! ```
//!
//! ## Growth
//!
//! Capacity jumps to the next power of two that fits the requested element
//! count, never below the configured minimum. Every live element is
//! relocated into the new block with the type's move function (copy if no
//! move exists), and the old block goes back to the pool.

// SAFETY: Columns manage untyped memory by hand.
// Invariants upheld by every method:
// - `data` is aligned to `descriptor.align` and valid for `capacity` elements
// - elements `[0, len)` are initialized, `[len, capacity)` are not
// - typed views check the Rust type against the descriptor first
#![allow(unsafe_code)]

use std::any::TypeId;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::slice;

use bytemuck::Pod;

use super::component::{Attribute, AttributeDescriptor, AttributeId};
use crate::config::{StorageConfig, DEFAULT_MIN_COLUMN_CAPACITY};
use crate::memory::{BlockPool, SharedPool};

/// Type-erased, growable, contiguous storage for one attribute type.
///
/// # Example
///
/// ```rust,ignore
/// let mut column = Column::new(descriptor, pool, 16);
/// column.push(Position::new(4.0, 2.0, 0.0));
/// column.push_default();
///
/// let positions: &[Position] = column.as_slice();
/// assert_eq!(positions.len(), 2);
/// ```
pub struct Column {
    /// Layout and lifecycle of the stored type.
    descriptor: AttributeDescriptor,
    /// Start of the buffer. Dangling but aligned while unallocated.
    data: NonNull<u8>,
    /// Live elements.
    len: usize,
    /// Allocated elements. `usize::MAX` for zero-sized types.
    capacity: usize,
    /// Smallest capacity after the first growth.
    min_capacity: usize,
    /// Source of buffer blocks.
    pool: SharedPool,
}

impl Column {
    /// Creates an empty column drawing blocks from `pool`.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - Layout and lifecycle of the stored type
    /// * `pool` - Block pool with the same alignment as the type
    /// * `min_capacity` - Smallest capacity after the first growth
    ///
    /// # Panics
    ///
    /// Panics if the pool's alignment differs from the type's.
    #[must_use]
    pub fn new(descriptor: AttributeDescriptor, pool: SharedPool, min_capacity: usize) -> Self {
        assert_eq!(
            pool.lock().align(),
            descriptor.align,
            "pool alignment must match attribute alignment"
        );

        let data = NonNull::new(descriptor.align as *mut u8).unwrap_or_else(NonNull::dangling);
        let capacity = if descriptor.is_zero_sized() { usize::MAX } else { 0 };

        Self {
            descriptor,
            data,
            len: 0,
            capacity,
            min_capacity: min_capacity.max(1),
            pool,
        }
    }

    /// Creates an empty column with a private pool.
    #[must_use]
    pub fn with_private_pool(descriptor: AttributeDescriptor, config: &StorageConfig) -> Self {
        let pool = BlockPool::shared(
            descriptor.align,
            config.pool_max_block_bytes,
            config.pool_max_cached_blocks,
        );
        Self::new(descriptor, pool, config.min_column_capacity)
    }

    /// Creates an empty column with a private pool and default tuning.
    #[must_use]
    pub fn standalone(descriptor: AttributeDescriptor) -> Self {
        let config = StorageConfig {
            min_column_capacity: DEFAULT_MIN_COLUMN_CAPACITY,
            ..StorageConfig::default()
        };
        Self::with_private_pool(descriptor, &config)
    }

    /// Returns the stored type's descriptor.
    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> &AttributeDescriptor {
        &self.descriptor
    }

    /// Returns the stored attribute's handle.
    #[inline]
    #[must_use]
    pub const fn attribute(&self) -> AttributeId {
        self.descriptor.id
    }

    /// Returns the pool this column allocates from.
    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &SharedPool {
        &self.pool
    }

    /// Returns the number of live elements.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no element is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of elements that fit without growing.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the allocated size in bytes. Zero for zero-sized types.
    #[inline]
    #[must_use]
    pub const fn byte_capacity(&self) -> usize {
        if self.descriptor.is_zero_sized() {
            0
        } else {
            self.capacity * self.descriptor.size
        }
    }

    /// Returns the size of the live elements in bytes.
    #[inline]
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.len * self.descriptor.size
    }

    /// Ensures room for at least `count` elements in total.
    ///
    /// # Panics
    ///
    /// Panics on capacity overflow.
    pub fn reserve(&mut self, count: usize) {
        if count <= self.capacity {
            return;
        }
        let new_capacity = count
            .checked_next_power_of_two()
            .unwrap_or_else(|| panic!("capacity overflow"))
            .max(self.min_capacity);
        self.reallocate(new_capacity);
    }

    /// Appends a default-constructed element and returns its row.
    pub fn push_default(&mut self) -> usize {
        self.reserve(self.len + 1);
        let row = self.len;
        // SAFETY: row < capacity and the slot is uninitialized
        unsafe { (self.descriptor.vtable.default)(self.slot(row)) };
        self.len += 1;
        row
    }

    /// Appends an element moved out of `src` and returns its row.
    ///
    /// # Safety
    ///
    /// `src` must hold a live value of this column's type outside this
    /// column. Afterwards it is logically uninitialized and must not be
    /// dropped by the caller.
    pub unsafe fn push_move(&mut self, src: *mut u8) -> usize {
        self.reserve(self.len + 1);
        let row = self.len;
        self.descriptor.vtable.relocate(self.slot(row), src);
        self.len += 1;
        row
    }

    /// Appends a copy of the value at `src` and returns its row.
    ///
    /// # Safety
    ///
    /// `src` must hold a live value of this column's type outside this
    /// column.
    ///
    /// # Panics
    ///
    /// Panics if the type has no copy function.
    pub unsafe fn push_copy(&mut self, src: *const u8) -> usize {
        let copy = self.copy_fn();
        self.reserve(self.len + 1);
        let row = self.len;
        copy(self.slot(row), src);
        self.len += 1;
        row
    }

    /// Appends a typed value and returns its row.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    pub fn push<T: Attribute>(&mut self, value: T) -> usize {
        self.check_type::<T>();
        let mut value = ManuallyDrop::new(value);
        // SAFETY: the type matches and `value` is never dropped here
        unsafe { self.push_move((&mut *value as *mut T).cast()) }
    }

    /// Appends `count` copies of the value at `src`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Column::push_copy`].
    pub unsafe fn extend_copies(&mut self, count: usize, src: *const u8) {
        let copy = self.copy_fn();
        self.reserve(self.len + count);
        for _ in 0..count {
            copy(self.slot(self.len), src);
            self.len += 1;
        }
    }

    /// Appends `count` copies of the element at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds or the type has no copy function.
    pub fn extend_copies_of_row(&mut self, count: usize, row: usize) {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let copy = self.copy_fn();
        // Reserve first so the source pointer survives growth
        self.reserve(self.len + count);
        // SAFETY: row is live, destinations are uninitialized capacity
        unsafe {
            let src = self.slot(row).cast_const();
            for _ in 0..count {
                copy(self.slot(self.len), src);
                self.len += 1;
            }
        }
    }

    /// Destroys the last element. Returns false on an empty column.
    pub fn pop(&mut self) -> bool {
        if self.len == 0 {
            return false;
        }
        self.len -= 1;
        // SAFETY: the slot held a live element
        unsafe { self.descriptor.vtable.destroy(self.slot(self.len)) };
        true
    }

    /// Grows or shrinks to exactly `new_len` live elements.
    ///
    /// New elements are default-constructed, surplus ones destroyed.
    pub fn resize(&mut self, new_len: usize) {
        if new_len > self.len {
            self.reserve(new_len);
            while self.len < new_len {
                // SAFETY: len < capacity and the slot is uninitialized
                unsafe { (self.descriptor.vtable.default)(self.slot(self.len)) };
                self.len += 1;
            }
        } else {
            while self.len > new_len {
                self.pop();
            }
        }
    }

    /// Destroys every element. Capacity is kept.
    pub fn clear(&mut self) {
        self.resize(0);
    }

    /// Destroys the element at `row` and fills the hole with the last one.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        // SAFETY: row is live
        unsafe { self.descriptor.vtable.destroy(self.slot(row)) };
        self.close_gap(row);
    }

    /// Moves the element at `row` to the end of `dst` and fills the hole
    /// with the last element. Returns the row in `dst`.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds or `dst` holds another attribute.
    pub fn swap_remove_into(&mut self, row: usize, dst: &mut Column) -> usize {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        assert_eq!(
            self.attribute(),
            dst.attribute(),
            "cannot migrate between columns of different attributes"
        );
        // SAFETY: row is live and belongs to a different column than dst
        let dst_row = unsafe { dst.push_move(self.slot(row)) };
        self.close_gap(row);
        dst_row
    }

    /// Returns a pointer to the element at `row`.
    #[inline]
    #[must_use]
    pub fn get_raw(&self, row: usize) -> Option<NonNull<u8>> {
        // SAFETY: bounds checked
        (row < self.len).then(|| unsafe { NonNull::new_unchecked(self.slot(row)) })
    }

    /// Returns a typed reference to the element at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    #[inline]
    #[must_use]
    pub fn get<T: 'static>(&self, row: usize) -> Option<&T> {
        self.as_slice::<T>().get(row)
    }

    /// Returns a typed mutable reference to the element at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    #[inline]
    pub fn get_mut<T: 'static>(&mut self, row: usize) -> Option<&mut T> {
        self.as_mut_slice::<T>().get_mut(row)
    }

    /// Returns the start of the live elements.
    #[inline]
    #[must_use]
    pub const fn data(&self) -> *const u8 {
        self.data.as_ptr().cast_const()
    }

    /// Returns the mutable start of the live elements.
    #[inline]
    pub fn data_mut(&mut self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Returns one past the last live element.
    #[inline]
    #[must_use]
    pub fn end(&self) -> *const u8 {
        // SAFETY: within or one past the allocation
        unsafe { self.slot(self.len).cast_const() }
    }

    /// Views the column as a typed slice.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    #[must_use]
    pub fn as_slice<T: 'static>(&self) -> &[T] {
        self.check_type::<T>();
        // SAFETY: type checked, [0, len) initialized, data aligned
        unsafe { slice::from_raw_parts(self.data.as_ptr().cast::<T>(), self.len) }
    }

    /// Views the column as a mutable typed slice.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    pub fn as_mut_slice<T: 'static>(&mut self) -> &mut [T] {
        self.check_type::<T>();
        // SAFETY: type checked, [0, len) initialized, data aligned, &mut self
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr().cast::<T>(), self.len) }
    }

    /// Views the live elements of a plain-old-data column as bytes.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not the column's type.
    #[must_use]
    pub fn as_bytes<T: Pod>(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice::<T>())
    }

    fn check_type<T: 'static>(&self) {
        assert!(
            self.descriptor.type_id == Some(TypeId::of::<T>()),
            "column for {} does not hold {}",
            self.descriptor.id,
            std::any::type_name::<T>()
        );
    }

    fn copy_fn(&self) -> super::vtable::CopyFn {
        self.descriptor
            .vtable
            .copy_fn
            .unwrap_or_else(|| panic!("attribute {} cannot be copied", self.descriptor.id))
    }

    /// Pointer to slot `row`. Valid for `row <= capacity`.
    #[inline]
    unsafe fn slot(&self, row: usize) -> *mut u8 {
        self.data.as_ptr().add(row * self.descriptor.size)
    }

    /// Moves the last element into `row`, whose value is already gone.
    fn close_gap(&mut self, row: usize) {
        let last = self.len - 1;
        if row != last {
            // SAFETY: `last` is live, `row` is logically uninitialized
            unsafe {
                self.descriptor
                    .vtable
                    .relocate(self.slot(row), self.slot(last));
            }
        }
        self.len = last;
    }

    fn reallocate(&mut self, new_capacity: usize) {
        let size = self.descriptor.size;
        let new_bytes = new_capacity
            .checked_mul(size)
            .unwrap_or_else(|| panic!("capacity overflow"));
        let new_block = self.pool.lock().allocate(new_bytes);

        // SAFETY: both blocks hold at least `len` slots and do not overlap
        unsafe {
            for row in 0..self.len {
                self.descriptor
                    .vtable
                    .relocate(new_block.as_ptr().add(row * size), self.slot(row));
            }
            if self.capacity > 0 {
                self.pool.lock().release(self.data, self.capacity * size);
            }
        }

        self.data = new_block;
        self.capacity = new_capacity;
        tracing::trace!(attribute = %self.descriptor.id, capacity = new_capacity, "column grew");
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();
        if !self.descriptor.is_zero_sized() && self.capacity > 0 {
            // SAFETY: the block came from this pool with this byte size
            unsafe {
                self.pool
                    .lock()
                    .release(self.data, self.capacity * self.descriptor.size);
            }
        }
    }
}

// SAFETY: Column owns its elements, and attribute types are Send + Sync
unsafe impl Send for Column {}
// SAFETY: Shared access only reads elements
unsafe impl Sync for Column {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::AttributeRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn column_for<T: Attribute>() -> Column {
        let mut registry = AttributeRegistry::new();
        let id = registry.register::<T>();
        Column::standalone(registry.descriptor(id).unwrap())
    }

    #[derive(Clone, Copy, Default, Debug, PartialEq)]
    struct Point {
        x: f32,
        y: f32,
    }

    #[derive(Clone, Default)]
    struct Tag;

    #[test]
    fn test_column_push_and_get() {
        let mut column = column_for::<Point>();
        column.push(Point { x: 1.0, y: 2.0 });
        column.push_default();

        assert_eq!(column.len(), 2);
        assert_eq!(column.get::<Point>(0), Some(&Point { x: 1.0, y: 2.0 }));
        assert_eq!(column.get::<Point>(1), Some(&Point::default()));
        assert_eq!(column.get::<Point>(2), None);
    }

    #[test]
    fn test_column_growth_policy() {
        let mut column = column_for::<u32>();
        assert_eq!(column.capacity(), 0);

        column.push(1_u32);
        assert_eq!(column.capacity(), 16);

        for i in 0..16_u32 {
            column.push(i);
        }
        assert_eq!(column.len(), 17);
        assert_eq!(column.capacity(), 32);
        assert_eq!(column.byte_capacity(), 128);

        column.reserve(33);
        assert_eq!(column.capacity(), 64);
    }

    #[test]
    fn test_column_growth_preserves_order() {
        let mut column = column_for::<String>();
        for i in 0..100 {
            column.push(i.to_string());
        }
        let values: Vec<usize> = column
            .as_slice::<String>()
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_column_swap_remove() {
        let mut column = column_for::<u32>();
        for i in 0..4_u32 {
            column.push(i);
        }
        column.swap_remove(1);
        assert_eq!(column.as_slice::<u32>(), &[0, 3, 2]);

        column.swap_remove(2);
        assert_eq!(column.as_slice::<u32>(), &[0, 3]);
    }

    #[test]
    fn test_column_swap_remove_into() {
        let mut src = column_for::<String>();
        let mut dst = Column::standalone(*src.descriptor());
        src.push(String::from("a"));
        src.push(String::from("b"));
        src.push(String::from("c"));

        let row = src.swap_remove_into(0, &mut dst);
        assert_eq!(row, 0);
        assert_eq!(dst.as_slice::<String>(), &["a"]);
        assert_eq!(src.as_slice::<String>(), &["c", "b"]);
    }

    #[test]
    fn test_column_resize_and_pop() {
        let mut column = column_for::<u64>();
        column.resize(5);
        assert_eq!(column.as_slice::<u64>(), &[0; 5]);

        column.resize(2);
        assert_eq!(column.len(), 2);
        assert!(column.pop());
        assert!(column.pop());
        assert!(!column.pop());
    }

    #[test]
    fn test_column_copies() {
        let mut column = column_for::<String>();
        column.push(String::from("proto"));
        column.extend_copies_of_row(40, 0);
        assert_eq!(column.len(), 41);
        assert!(column.as_slice::<String>().iter().all(|s| s == "proto"));

        let other = String::from("x");
        unsafe { column.extend_copies(2, std::ptr::addr_of!(other).cast()) };
        assert_eq!(column.get::<String>(42).map(String::as_str), Some("x"));
    }

    #[test]
    fn test_column_zero_sized() {
        let mut column = column_for::<Tag>();
        for _ in 0..1000 {
            column.push(Tag);
        }
        assert_eq!(column.len(), 1000);
        assert_eq!(column.byte_capacity(), 0);
        assert_eq!(column.data(), column.end());
        column.swap_remove(10);
        assert_eq!(column.len(), 999);
    }

    #[test]
    fn test_column_raw_range() {
        let mut column = column_for::<u32>();
        column.push(7_u32);
        column.push(9_u32);
        let span = column.end() as usize - column.data() as usize;
        assert_eq!(span, 8);
        assert_eq!(column.byte_len(), 8);
        assert_eq!(column.as_bytes::<u32>().len(), 8);
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_column_type_mismatch_panics() {
        let column = column_for::<u32>();
        let _ = column.as_slice::<f32>();
    }

    static LIVE: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl Default for Counted {
        fn default() -> Self {
            LIVE.fetch_add(1, Ordering::SeqCst);
            Self
        }
    }

    impl Clone for Counted {
        fn clone(&self) -> Self {
            Self::default()
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            LIVE.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_column_drop_accounting() {
        {
            let mut column = column_for::<Counted>();
            column.resize(50);
            column.swap_remove(3);
            column.pop();
            column.extend_copies_of_row(10, 0);
            assert_eq!(LIVE.load(Ordering::SeqCst), 58);
        }
        assert_eq!(LIVE.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_column_returns_blocks_to_pool() {
        let mut registry = AttributeRegistry::new();
        let id = registry.register::<u64>();
        let descriptor = registry.descriptor(id).unwrap();
        let pool = BlockPool::shared(descriptor.align, 4096, 8);

        {
            let mut column = Column::new(descriptor, Arc::clone(&pool), 16);
            for i in 0..20_u64 {
                column.push(i);
            }
        }
        assert_eq!(pool.lock().cached_blocks(), 2);

        let mut column = Column::new(descriptor, Arc::clone(&pool), 16);
        for i in 0..20_u64 {
            column.push(i);
        }
        assert_eq!(pool.lock().reuses(), 2);
        assert_eq!(pool.lock().allocations(), 2);
    }
}
