//! # Bundles
//!
//! Tuples of attributes passed by value into creation and attachment.

// SAFETY: Bundles hand out raw pointers to their own fields.
#![allow(unsafe_code)]

use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use super::component::{Attribute, AttributeId, AttributeRegistry};

/// A fixed set of attribute values.
///
/// Implemented for tuples of one to eight attributes.
///
/// # Safety
///
/// Pointer `i` handed out by [`Bundle::with_moved`] and
/// [`Bundle::with_borrowed`] must point at a live value of the type whose
/// handle is at position `i` of [`Bundle::register`] and
/// [`Bundle::lookup`].
pub unsafe trait Bundle: Send + Sync + 'static {
    /// Registers every member type and returns the handles in member order.
    fn register(attributes: &mut AttributeRegistry) -> Vec<AttributeId>;

    /// Returns the handles in member order, or `None` if a member type was
    /// never registered.
    fn lookup(attributes: &AttributeRegistry) -> Option<Vec<AttributeId>>;

    /// Calls `f` with a pointer to each member, in member order.
    ///
    /// `f` takes ownership: every pointed-to value must be moved out.
    /// Values `f` leaves behind are leaked, never dropped twice.
    fn with_moved<R>(self, f: impl FnOnce(&[NonNull<u8>]) -> R) -> R;

    /// Calls `f` with a read-only pointer to each member, in member order.
    fn with_borrowed<R>(&self, f: impl FnOnce(&[NonNull<u8>]) -> R) -> R;
}

macro_rules! impl_bundle {
    ($(($name:ident, $index:tt)),+) => {
        // SAFETY: pointer `$index` addresses field `$index`, of type `$name`,
        // which is also the type registered at position `$index`
        unsafe impl<$($name: Attribute),+> Bundle for ($($name,)+) {
            fn register(attributes: &mut AttributeRegistry) -> Vec<AttributeId> {
                vec![$(attributes.register::<$name>()),+]
            }

            fn lookup(attributes: &AttributeRegistry) -> Option<Vec<AttributeId>> {
                Some(vec![$(attributes.id_of::<$name>()?),+])
            }

            fn with_moved<R>(self, f: impl FnOnce(&[NonNull<u8>]) -> R) -> R {
                let mut values = ManuallyDrop::new(self);
                let pointers = [$(NonNull::from(&mut values.$index).cast::<u8>()),+];
                f(&pointers)
            }

            fn with_borrowed<R>(&self, f: impl FnOnce(&[NonNull<u8>]) -> R) -> R {
                let pointers = [$(NonNull::from(&self.$index).cast::<u8>()),+];
                f(&pointers)
            }
        }
    };
}

impl_bundle!((A, 0));
impl_bundle!((A, 0), (B, 1));
impl_bundle!((A, 0), (B, 1), (C, 2));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6));
impl_bundle!((A, 0), (B, 1), (C, 2), (D, 3), (E, 4), (F, 5), (G, 6), (H, 7));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_register_order() {
        let mut attributes = AttributeRegistry::new();
        let late = attributes.register::<u64>();
        let ids = <(u8, u64)>::register(&mut attributes);
        assert_eq!(ids[1], late);
        assert_eq!(<(u8, u64)>::lookup(&attributes), Some(ids));
        assert_eq!(<(u8, u16)>::lookup(&attributes), None);
    }

    #[test]
    fn test_bundle_pointers_address_members() {
        let bundle = (7_u8, String::from("seven"));
        bundle.with_borrowed(|pointers| {
            assert_eq!(pointers.len(), 2);
            let first = unsafe { *pointers[0].cast::<u8>().as_ptr() };
            let second = unsafe { &*pointers[1].cast::<String>().as_ptr() };
            assert_eq!(first, 7);
            assert_eq!(second, "seven");
        });
    }

    #[test]
    fn test_bundle_moves_out() {
        let moved = (String::from("owned"),).with_moved(|pointers| unsafe {
            pointers[0].cast::<String>().as_ptr().read()
        });
        assert_eq!(moved, "owned");
    }
}
