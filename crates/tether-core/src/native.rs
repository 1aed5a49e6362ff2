//! Values produced by native code.
//!
//! A [`NativeValue`] is what a native entry point returns and what a native
//! event carries. Unlike host values these are `Send`, so they can be created
//! on a background thread and queued for the host thread.

use std::fmt;

use tracing::trace;

use crate::handle::{Destructor, Ownership, RawAddress, TypeTag};

/// A native object about to cross into the host.
///
/// An owned object carries its type-specific destructor until it is wrapped
/// in an owning handle. If it is dropped before that happens (a result that
/// contradicts its declared shape, an event nobody listens to) the destructor
/// runs here instead, so the object is neither leaked nor owned twice.
pub struct NativeObject {
    address: RawAddress,
    tag: TypeTag,
    ownership: Ownership,
    destructor: Option<Destructor>,
}

impl NativeObject {
    /// Hand a boxed object to the host. The host becomes its sole owner.
    pub fn owned<T: Send + 'static>(value: Box<T>) -> Self {
        let address = RawAddress::from_ptr(Box::into_raw(value).cast_const());
        // SAFETY: the address came from `Box::<T>::into_raw` and nothing else
        // owns it; `drop_boxed::<T>` reclaims exactly that box.
        unsafe { Self::owned_with(address, TypeTag::of::<T>(), drop_boxed::<T>) }
    }

    /// Hand an object with a custom destructor to the host.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object of the type `tag` identifies,
    /// owned by nobody else, and it must stay valid until `destructor` runs.
    /// Handles built from it give typed access to that address.
    pub unsafe fn owned_with<F>(address: RawAddress, tag: TypeTag, destructor: F) -> Self
    where
        F: FnOnce(RawAddress) + Send + 'static,
    {
        Self {
            address,
            tag,
            ownership: Ownership::Owning,
            destructor: Some(Box::new(destructor)),
        }
    }

    /// Lend an object whose lifetime is managed elsewhere.
    ///
    /// # Safety
    ///
    /// The borrow's lifetime is erased. `value` must stay alive, and must not
    /// move, for as long as any handle built from this object is used.
    pub unsafe fn borrowed<T: Sync + 'static>(value: &T) -> Self {
        // SAFETY: forwarded to the caller; the address and tag match `value`.
        unsafe { Self::borrowed_at(RawAddress::from_ptr(value as *const T), TypeTag::of::<T>()) }
    }

    /// Lend an object by address.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object of the type `tag` identifies for
    /// as long as any handle built from this object is used.
    ///
    /// ```compile_fail
    /// use tether_core::{NativeObject, RawAddress, TypeTag};
    ///
    /// let dangling = NativeObject::borrowed_at(RawAddress::new(0x8), TypeTag::of::<u64>());
    /// ```
    pub unsafe fn borrowed_at(address: RawAddress, tag: TypeTag) -> Self {
        Self {
            address,
            tag,
            ownership: Ownership::Borrowing,
            destructor: None,
        }
    }

    /// The object's address.
    pub fn address(&self) -> RawAddress {
        self.address
    }

    /// The object's type.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Whether the host will own or borrow the object.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Take the object apart for wrapping. The caller becomes responsible for
    /// running the destructor.
    pub fn into_parts(mut self) -> (RawAddress, TypeTag, Option<Destructor>) {
        let destructor = self.destructor.take();
        (self.address, self.tag, destructor)
    }

    /// Short description, e.g. `owned<Timer>`.
    pub fn describe(&self) -> String {
        match self.ownership {
            Ownership::Owning => format!("owned<{}>", self.tag),
            Ownership::Borrowing => format!("borrowed<{}>", self.tag),
        }
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        if let Some(destructor) = self.destructor.take() {
            trace!(address = %self.address, type_name = self.tag.short_name(), "Destroying unwrapped native object");
            destructor(self.address);
        }
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeObject")
            .field("address", &self.address)
            .field("tag", &self.tag)
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// Reclaims an object leaked by [`NativeObject::owned`].
fn drop_boxed<T>(address: RawAddress) {
    // SAFETY: only installed by `NativeObject::owned::<T>`, whose address came
    // from `Box::<T>::into_raw`, and destructors run at most once.
    unsafe { drop(Box::from_raw(address.as_mut_ptr::<T>())) }
}

/// A value returned by a native entry point or carried by a native event.
#[derive(Debug, Default)]
pub enum NativeValue {
    /// No value.
    #[default]
    Nothing,
    /// A boolean.
    Bool(bool),
    /// A 32-bit integer.
    Int32(i32),
    /// A 64-bit integer.
    Int64(i64),
    /// A string, always copied.
    Str(String),
    /// A native object.
    Object(NativeObject),
}

impl NativeValue {
    /// Short description of the value's shape.
    pub fn describe(&self) -> String {
        match self {
            Self::Nothing => "nothing".to_string(),
            Self::Bool(_) => "bool".to_string(),
            Self::Int32(_) => "int32".to_string(),
            Self::Int64(_) => "int64".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::Object(obj) => obj.describe(),
        }
    }
}

impl From<()> for NativeValue {
    fn from(_: ()) -> Self {
        Self::Nothing
    }
}

impl From<bool> for NativeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for NativeValue {
    fn from(n: i32) -> Self {
        Self::Int32(n)
    }
}

impl From<i64> for NativeValue {
    fn from(n: i64) -> Self {
        Self::Int64(n)
    }
}

impl From<String> for NativeValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for NativeValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<NativeObject> for NativeValue {
    fn from(obj: NativeObject) -> Self {
        Self::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unwrapped_owned_object_is_destroyed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let obj = NativeObject::owned(Box::new(Tracked(Arc::clone(&drops))));
        assert_eq!(obj.describe(), "owned<Tracked>");

        drop(obj);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_parts_transfers_destructor() {
        let drops = Arc::new(AtomicUsize::new(0));
        let obj = NativeObject::owned(Box::new(Tracked(Arc::clone(&drops))));

        let (address, tag, destructor) = obj.into_parts();
        assert!(tag.is::<Tracked>());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let destructor = destructor.unwrap();
        destructor(address);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrowed_has_no_destructor() {
        let value = 5u32;
        // SAFETY: no handle is built from `obj`.
        let obj = unsafe { NativeObject::borrowed(&value) };
        assert_eq!(obj.ownership(), Ownership::Borrowing);
        assert_eq!(obj.address(), RawAddress::from_ptr(&value as *const u32));

        let (_, _, destructor) = obj.into_parts();
        assert!(destructor.is_none());
    }

    #[test]
    fn test_describe_values() {
        assert_eq!(NativeValue::from(()).describe(), "nothing");
        assert_eq!(NativeValue::from(7i64).describe(), "int64");
        assert_eq!(NativeValue::from("ok").describe(), "string");
    }
}
