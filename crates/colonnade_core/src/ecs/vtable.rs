//! # Lifecycle Tables
//!
//! Columns never know the concrete type they hold. Everything they do to an
//! element goes through a [`LifecycleVTable`], resolved once per attribute
//! type at registration.

// SAFETY: The table functions operate on untyped memory.
// Each function is monomorphized for exactly one type and is only ever
// called by columns created for that type.
#![allow(unsafe_code)]

use std::mem;
use std::ptr;

use super::component::Attribute;

/// Writes a default value into uninitialized memory.
pub type DefaultFn = unsafe fn(dst: *mut u8);
/// Moves a value from `src` into uninitialized `dst`. `src` is left
/// logically uninitialized.
pub type MoveFn = unsafe fn(dst: *mut u8, src: *mut u8);
/// Copy-constructs a value from `src` into uninitialized `dst`.
pub type CopyFn = unsafe fn(dst: *mut u8, src: *const u8);
/// Destroys the value at `target` in place.
pub type DestroyFn = unsafe fn(target: *mut u8);

/// Function table for one attribute type.
///
/// `destroy` is `None` for types without drop glue. A table must offer at
/// least one of `move_fn` and `copy_fn`, otherwise a column could never
/// relocate its elements on growth.
#[derive(Clone, Copy, Debug)]
pub struct LifecycleVTable {
    /// Default construction.
    pub default: DefaultFn,
    /// Move construction.
    pub move_fn: Option<MoveFn>,
    /// Copy construction.
    pub copy_fn: Option<CopyFn>,
    /// Destruction.
    pub destroy: Option<DestroyFn>,
}

unsafe fn default_in_place<T: Default>(dst: *mut u8) {
    dst.cast::<T>().write(T::default());
}

unsafe fn move_in_place<T>(dst: *mut u8, src: *mut u8) {
    ptr::copy_nonoverlapping(src.cast::<T>().cast_const(), dst.cast::<T>(), 1);
}

unsafe fn copy_in_place<T: Clone>(dst: *mut u8, src: *const u8) {
    dst.cast::<T>().write((*src.cast::<T>()).clone());
}

unsafe fn destroy_in_place<T>(target: *mut u8) {
    ptr::drop_in_place(target.cast::<T>());
}

impl LifecycleVTable {
    /// Builds the table for a Rust attribute type.
    #[must_use]
    pub fn of<T: Attribute>() -> Self {
        Self {
            default: default_in_place::<T>,
            move_fn: Some(move_in_place::<T>),
            copy_fn: Some(copy_in_place::<T>),
            destroy: if mem::needs_drop::<T>() {
                Some(destroy_in_place::<T>)
            } else {
                None
            },
        }
    }

    /// Returns true if elements can be relocated by move or by copy.
    #[inline]
    #[must_use]
    pub const fn is_relocatable(&self) -> bool {
        self.move_fn.is_some() || self.copy_fn.is_some()
    }

    /// Relocates a value from `src` into `dst`, preferring move over copy.
    ///
    /// With the copy fallback the source is destroyed afterwards, so in
    /// both cases `src` ends up logically uninitialized.
    ///
    /// # Safety
    ///
    /// `src` must hold a live value of this table's type, `dst` must be
    /// valid uninitialized storage for one, and the two must not overlap.
    ///
    /// # Panics
    ///
    /// Panics if the table offers neither move nor copy. Registration
    /// rejects such tables, so this is unreachable for registered types.
    #[inline]
    pub unsafe fn relocate(&self, dst: *mut u8, src: *mut u8) {
        if let Some(move_fn) = self.move_fn {
            move_fn(dst, src);
        } else if let Some(copy_fn) = self.copy_fn {
            copy_fn(dst, src.cast_const());
            self.destroy(src);
        } else {
            panic!("attribute can be neither moved nor copied");
        }
    }

    /// Destroys the value at `target` if the type has drop glue.
    ///
    /// # Safety
    ///
    /// `target` must hold a live value of this table's type.
    #[inline]
    pub unsafe fn destroy(&self, target: *mut u8) {
        if let Some(destroy) = self.destroy {
            destroy(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    #[test]
    fn test_vtable_default_and_copy() {
        let table = LifecycleVTable::of::<u64>();
        assert!(table.destroy.is_none());
        assert!(table.is_relocatable());

        let mut slot = MaybeUninit::<u64>::uninit();
        unsafe {
            (table.default)(slot.as_mut_ptr().cast());
            assert_eq!(slot.assume_init(), 0);
        }

        let source = 42_u64;
        let mut copy = MaybeUninit::<u64>::uninit();
        unsafe {
            (table.copy_fn.unwrap())(copy.as_mut_ptr().cast(), (&source as *const u64).cast());
            assert_eq!(copy.assume_init(), 42);
        }
    }

    #[test]
    fn test_vtable_relocate_owned() {
        let table = LifecycleVTable::of::<String>();
        assert!(table.destroy.is_some());

        let mut src = MaybeUninit::new(String::from("moved"));
        let mut dst = MaybeUninit::<String>::uninit();
        unsafe {
            table.relocate(dst.as_mut_ptr().cast(), src.as_mut_ptr().cast());
            assert_eq!(dst.assume_init_ref(), "moved");
            table.destroy(dst.as_mut_ptr().cast());
        }
    }

    #[test]
    fn test_vtable_copy_fallback() {
        let mut table = LifecycleVTable::of::<String>();
        table.move_fn = None;

        let mut src = MaybeUninit::new(String::from("copied"));
        let mut dst = MaybeUninit::<String>::uninit();
        unsafe {
            table.relocate(dst.as_mut_ptr().cast(), src.as_mut_ptr().cast());
            assert_eq!(dst.assume_init_ref(), "copied");
            table.destroy(dst.as_mut_ptr().cast());
        }
    }

    #[test]
    #[should_panic(expected = "neither moved nor copied")]
    fn test_vtable_without_relocation_is_fatal() {
        let mut table = LifecycleVTable::of::<u32>();
        table.move_fn = None;
        table.copy_fn = None;
        assert!(!table.is_relocatable());

        let mut src = MaybeUninit::new(1_u32);
        let mut dst = MaybeUninit::<u32>::uninit();
        unsafe { table.relocate(dst.as_mut_ptr().cast(), src.as_mut_ptr().cast()) };
    }
}
