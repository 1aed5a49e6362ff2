//! Opaque handles and the finalization side table.
//!
//! The host never sees a native address. It holds an [`OpaqueHandle`], which
//! carries nothing but a [`HandleId`]; the [`HandleTable`] maps that id to the
//! native address, the object's [`TypeTag`] and its [`Ownership`] mode.
//!
//! # Ownership
//!
//! - An *owning* handle is the only way the host can destroy its object. When
//!   the host collector proves the handle unreachable ([`HandleTable::collect`])
//!   or the host releases it explicitly ([`HandleTable::release`]), the
//!   destructor runs exactly once.
//! - A *borrowing* handle references an object that lives elsewhere.
//!   Dropping it never destroys anything.
//!
//! # Caller obligations
//!
//! The table cannot tell whether a borrowed object is still alive, nor whether
//! two owners were handed the same address. Both are undefined behavior and
//! must be prevented by construction: owned objects only enter the table
//! through [`NativeObject`](crate::native::NativeObject), which moves its
//! destructor out exactly once. Every constructor that trusts a raw address
//! is an `unsafe fn` stating what the address must satisfy.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::value::HostValue;

/// Identifier of an entry in a [`HandleTable`]. Never reused within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// The raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Address of a natively owned object.
///
/// The bridge never dereferences an address on its own; typed access goes
/// through a [`TypeTag`] check first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAddress(usize);

impl RawAddress {
    /// Create an address from a plain integer.
    pub fn new(address: usize) -> Self {
        Self(address)
    }

    /// Capture the address of a pointer, exposing its provenance so it can be
    /// turned back into a pointer later.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.expose_provenance())
    }

    /// The numeric address.
    pub fn get(self) -> usize {
        self.0
    }

    /// Reconstruct a const pointer to `T`.
    pub fn as_ptr<T>(self) -> *const T {
        std::ptr::with_exposed_provenance(self.0)
    }

    /// Reconstruct a mutable pointer to `T`.
    pub fn as_mut_ptr<T>(self) -> *mut T {
        std::ptr::with_exposed_provenance_mut(self.0)
    }
}

impl fmt::Display for RawAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Runtime type identity of a native object.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// The tag for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Whether this tag identifies `T`.
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl std::hash::Hash for TypeTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeTag").field(&self.name).finish()
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Ownership mode of a handle, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Collecting or releasing the handle destroys the native object.
    Owning,
    /// The native object is owned elsewhere.
    Borrowing,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owning => f.write_str("owning"),
            Self::Borrowing => f.write_str("borrowing"),
        }
    }
}

/// Type-specific cleanup for an owned native object.
pub type Destructor = Box<dyn FnOnce(RawAddress) + Send>;

#[derive(Debug)]
struct HandleCell {
    id: HandleId,
}

/// Host-visible reference to a native object.
///
/// Clones share reachability: the table considers the handle unreachable only
/// once every clone has been dropped.
#[derive(Clone)]
pub struct OpaqueHandle {
    cell: Rc<HandleCell>,
}

impl OpaqueHandle {
    /// The id this handle maps to.
    pub fn id(&self) -> HandleId {
        self.cell.id
    }
}

impl PartialEq for OpaqueHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OpaqueHandle {}

impl fmt::Debug for OpaqueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueHandle({})", self.id())
    }
}

struct HandleEntry {
    address: RawAddress,
    tag: TypeTag,
    ownership: Ownership,
    destructor: Option<Destructor>,
    reach: Weak<HandleCell>,
}

impl HandleEntry {
    /// Run the destructor if one is still pending. Returns whether it ran.
    fn finalize(&mut self) -> bool {
        match self.destructor.take() {
            Some(destructor) => {
                destructor(self.address);
                true
            }
            None => false,
        }
    }
}

/// Record of an entry removed from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finalized {
    /// The handle id.
    pub id: HandleId,
    /// The native address it referenced.
    pub address: RawAddress,
    /// Ownership mode of the handle.
    pub ownership: Ownership,
    /// Whether a destructor ran.
    pub destructor_ran: bool,
}

/// Counters describing handle activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    /// Owning handles created.
    pub owning_created: u64,
    /// Borrowing handles created.
    pub borrowing_created: u64,
    /// Entries removed by the collector.
    pub finalized: u64,
    /// Entries removed by explicit release.
    pub released: u64,
    /// Owning entries finalized at teardown.
    pub leaked: u64,
    /// Entries currently in the table.
    pub live: usize,
}

/// Side table mapping handle ids to native objects.
pub struct HandleTable {
    entries: HashMap<HandleId, HandleEntry>,
    next_id: u64,
    stats: HandleStats,
}

impl HandleTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            stats: HandleStats::default(),
        }
    }

    fn insert(
        &mut self,
        address: RawAddress,
        tag: TypeTag,
        ownership: Ownership,
        destructor: Option<Destructor>,
    ) -> OpaqueHandle {
        let id = HandleId(self.next_id);
        self.next_id += 1;

        let cell = Rc::new(HandleCell { id });
        self.entries.insert(
            id,
            HandleEntry {
                address,
                tag,
                ownership,
                destructor,
                reach: Rc::downgrade(&cell),
            },
        );

        trace!(%id, %address, type_name = tag.short_name(), %ownership, "Wrapped native object");
        OpaqueHandle { cell }
    }

    /// Wrap an address in an owning handle.
    ///
    /// `destructor` runs at most once: when the collector finds the handle
    /// unreachable, when it is released, or at teardown.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object of the type `tag` identifies,
    /// owned by nobody else, until `destructor` runs. Typed access through
    /// the handle dereferences it.
    pub unsafe fn make_owning<F>(
        &mut self,
        address: RawAddress,
        tag: TypeTag,
        destructor: F,
    ) -> OpaqueHandle
    where
        F: FnOnce(RawAddress) + Send + 'static,
    {
        self.stats.owning_created += 1;
        self.insert(address, tag, Ownership::Owning, Some(Box::new(destructor)))
    }

    /// Wrap an address in a borrowing handle. Collection is a no-op for the
    /// referenced object.
    ///
    /// # Safety
    ///
    /// `address` must point to a live object of the type `tag` identifies for
    /// as long as the handle is used for typed access.
    ///
    /// ```compile_fail
    /// use tether_core::{HandleTable, RawAddress, TypeTag};
    ///
    /// let mut table = HandleTable::new();
    /// let handle = table.make_borrowing(RawAddress::new(0x8), TypeTag::of::<u64>());
    /// ```
    pub unsafe fn make_borrowing(&mut self, address: RawAddress, tag: TypeTag) -> OpaqueHandle {
        self.stats.borrowing_created += 1;
        self.insert(address, tag, Ownership::Borrowing, None)
    }

    fn entry(&self, handle: &OpaqueHandle) -> BridgeResult<&HandleEntry> {
        self.entries
            .get(&handle.id())
            .ok_or(BridgeError::StaleHandle(handle.id()))
    }

    /// Retrieve the address behind a host value.
    pub fn unwrap(&self, value: &HostValue) -> BridgeResult<RawAddress> {
        match value {
            HostValue::Handle(handle) => Ok(self.entry(handle)?.address),
            other => Err(BridgeError::type_mismatch("opaque handle", other.type_name())),
        }
    }

    /// Retrieve the address behind a host value, requiring a specific type.
    pub fn unwrap_as(&self, value: &HostValue, expected: TypeTag) -> BridgeResult<RawAddress> {
        let HostValue::Handle(handle) = value else {
            return Err(BridgeError::type_mismatch(
                format!("handle<{expected}>"),
                value.type_name(),
            ));
        };

        let entry = self.entry(handle)?;
        if entry.tag != expected {
            return Err(BridgeError::type_mismatch(
                format!("handle<{expected}>"),
                format!("handle<{}>", entry.tag),
            ));
        }
        Ok(entry.address)
    }

    /// Type tag of a live handle.
    pub fn type_tag(&self, handle: &OpaqueHandle) -> Option<TypeTag> {
        self.entries.get(&handle.id()).map(|e| e.tag)
    }

    /// Ownership mode of a live handle.
    pub fn ownership(&self, handle: &OpaqueHandle) -> Option<Ownership> {
        self.entries.get(&handle.id()).map(|e| e.ownership)
    }

    /// Whether the handle still maps to an entry.
    pub fn contains(&self, handle: &OpaqueHandle) -> bool {
        self.entries.contains_key(&handle.id())
    }

    /// Release a handle now instead of waiting for the collector.
    ///
    /// Owning handles destroy their object immediately. Any further use of the
    /// handle (or its clones) fails with [`BridgeError::StaleHandle`].
    pub fn release(&mut self, handle: &OpaqueHandle) -> BridgeResult<Finalized> {
        let mut entry = self
            .entries
            .remove(&handle.id())
            .ok_or(BridgeError::StaleHandle(handle.id()))?;

        let destructor_ran = entry.finalize();
        self.stats.released += 1;
        debug!(id = %handle.id(), address = %entry.address, destructor_ran, "Released handle");

        Ok(Finalized {
            id: handle.id(),
            address: entry.address,
            ownership: entry.ownership,
            destructor_ran,
        })
    }

    /// Collector hook: drop every entry whose host handle is unreachable.
    ///
    /// Entries are finalized in id order. Running the collector again never
    /// finalizes an entry twice, since finalized entries leave the table.
    pub fn collect(&mut self) -> Vec<Finalized> {
        let mut dead: Vec<HandleId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.reach.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        dead.sort_unstable();

        let mut finalized = Vec::with_capacity(dead.len());
        for id in dead {
            if let Some(mut entry) = self.entries.remove(&id) {
                let destructor_ran = entry.finalize();
                trace!(%id, address = %entry.address, destructor_ran, "Finalized handle");
                finalized.push(Finalized {
                    id,
                    address: entry.address,
                    ownership: entry.ownership,
                    destructor_ran,
                });
            }
        }

        self.stats.finalized += finalized.len() as u64;
        if !finalized.is_empty() {
            debug!(count = finalized.len(), live = self.entries.len(), "Collected handles");
        }
        finalized
    }

    /// Finalize everything left in the table. Returns the number of owning
    /// handles that had not been collected or released.
    pub fn teardown(&mut self) -> usize {
        let mut ids: Vec<HandleId> = self.entries.keys().copied().collect();
        ids.sort_unstable();

        let mut leaked = 0;
        for id in ids {
            if let Some(mut entry) = self.entries.remove(&id) {
                if entry.ownership == Ownership::Owning {
                    warn!(
                        %id,
                        address = %entry.address,
                        type_name = entry.tag.short_name(),
                        "Owning handle still live at teardown"
                    );
                    leaked += 1;
                }
                entry.finalize();
            }
        }

        self.stats.leaked += leaked as u64;
        leaked
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counters.
    pub fn stats(&self) -> HandleStats {
        HandleStats {
            live: self.entries.len(),
            ..self.stats
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Drop for HandleTable {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // None of these tests take typed access, so the fake addresses below are
    // never dereferenced.
    struct Widget;
    struct Gadget;

    fn counting_destructor(
        count: Arc<AtomicUsize>,
        seen: Arc<AtomicUsize>,
    ) -> impl FnOnce(RawAddress) + Send + 'static {
        move |address| {
            count.fetch_add(1, Ordering::SeqCst);
            seen.store(address.get(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_round_trip_owning_and_borrowing() {
        let mut table = HandleTable::new();
        let owning =
            unsafe { table.make_owning(RawAddress::new(0x1000), TypeTag::of::<Widget>(), |_| {}) };
        let borrowing = unsafe { table.make_borrowing(RawAddress::new(0x2000), TypeTag::of::<Widget>()) };

        let owning = HostValue::Handle(owning);
        let borrowing = HostValue::Handle(borrowing);
        assert_eq!(table.unwrap(&owning).unwrap(), RawAddress::new(0x1000));
        assert_eq!(table.unwrap(&borrowing).unwrap(), RawAddress::new(0x2000));
    }

    #[test]
    fn test_destructor_runs_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = HandleTable::new();

        let handle = unsafe {
            table.make_owning(
                RawAddress::new(0xbeef),
                TypeTag::of::<Widget>(),
                counting_destructor(Arc::clone(&count), Arc::clone(&seen)),
            )
        };
        let clone = handle.clone();

        drop(handle);
        assert!(table.collect().is_empty(), "a clone is still reachable");
        assert_eq!(count.load(Ordering::SeqCst), 0);

        drop(clone);
        let finalized = table.collect();
        assert_eq!(finalized.len(), 1);
        assert!(finalized[0].destructor_ran);

        for _ in 0..5 {
            assert!(table.collect().is_empty());
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0xbeef);
        assert_eq!(table.stats().finalized, 1);
    }

    #[test]
    fn test_borrowing_collection_runs_nothing() {
        let mut table = HandleTable::new();
        let handle = unsafe { table.make_borrowing(RawAddress::new(0x10), TypeTag::of::<Widget>()) };
        drop(handle);

        let finalized = table.collect();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].ownership, Ownership::Borrowing);
        assert!(!finalized[0].destructor_ran);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unwrap_rejects_non_handles() {
        let table = HandleTable::new();
        let err = table.unwrap(&HostValue::Int32(7)).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));

        let err = table
            .unwrap_as(&HostValue::string("x"), TypeTag::of::<Widget>())
            .unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_unwrap_as_checks_tag() {
        let mut table = HandleTable::new();
        let handle = unsafe { table.make_borrowing(RawAddress::new(0x10), TypeTag::of::<Widget>()) };
        let value = HostValue::Handle(handle);

        assert!(table.unwrap_as(&value, TypeTag::of::<Widget>()).is_ok());
        match table.unwrap_as(&value, TypeTag::of::<Gadget>()) {
            Err(BridgeError::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, "handle<Gadget>");
                assert_eq!(actual, "handle<Widget>");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_release_then_stale() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = HandleTable::new();
        let handle = unsafe {
            table.make_owning(
                RawAddress::new(0x40),
                TypeTag::of::<Widget>(),
                counting_destructor(Arc::clone(&count), Arc::clone(&seen)),
            )
        };

        let released = table.release(&handle).unwrap();
        assert!(released.destructor_ran);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let value = HostValue::Handle(handle.clone());
        assert!(matches!(table.unwrap(&value), Err(BridgeError::StaleHandle(_))));
        assert!(matches!(table.release(&handle), Err(BridgeError::StaleHandle(_))));

        drop(value);
        drop(handle);
        assert!(table.collect().is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_teardown_finalizes_leaks() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(AtomicUsize::new(0));
        let mut table = HandleTable::new();
        let _owning = unsafe {
            table.make_owning(
                RawAddress::new(0x50),
                TypeTag::of::<Widget>(),
                counting_destructor(Arc::clone(&count), Arc::clone(&seen)),
            )
        };
        let _borrowing = unsafe { table.make_borrowing(RawAddress::new(0x60), TypeTag::of::<Widget>()) };

        assert_eq!(table.teardown(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(table.is_empty());
        assert_eq!(table.stats().leaked, 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut table = HandleTable::new();
        let first = unsafe { table.make_borrowing(RawAddress::new(1), TypeTag::of::<Widget>()) };
        let first_id = first.id();
        table.release(&first).unwrap();

        let second = unsafe { table.make_borrowing(RawAddress::new(1), TypeTag::of::<Widget>()) };
        assert_ne!(first_id, second.id());
        assert!(!table.contains(&first));
        assert!(table.contains(&second));
    }
}
