//! Pointer identity registry.
//!
//! Some objects handed to foreign code (functions, environments, external
//! handles) have no native memory layout. The registry gives each of them a
//! stable integer address and maps that address back to the object when
//! foreign code hands it in again.
//!
//! Objects without a custom address draw from a tagged counter starting at
//! [`MIRROR_ADDRESS_BASE`], far from where heap allocations land. Entries
//! are never removed: an address, once assigned, keeps pointing at the same
//! object for the life of the process.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use ahash::AHashMap;

use crate::helpers::NULL_ADDRESS;
use crate::types::DEFAULT_REGISTRY_CAPACITY;
use crate::BridgeError;

/// First address handed out by the mirror counter.
#[cfg(target_pointer_width = "64")]
pub const MIRROR_ADDRESS_BASE: usize = 0x0def_0000_0000_0000;
#[cfg(not(target_pointer_width = "64"))]
pub const MIRROR_ADDRESS_BASE: usize = 0xdef0_0000;

/// An object that can be given a registry address.
pub trait MirrorTarget: Any + Send + Sync + fmt::Debug {
    /// Address to use instead of the next mirror counter value. Fails with
    /// `AddressCollision` if already taken.
    fn custom_address(&self) -> Option<usize> {
        None
    }

    /// Recover the concrete type behind a resolved address. Implement as
    /// `{ self }`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A registered object, or the null object.
#[derive(Clone, Debug)]
pub enum MirrorRef {
    /// Has no native representation; always address 0.
    Null,
    Object(Arc<dyn MirrorTarget>),
}

impl MirrorRef {
    pub fn new<T: MirrorTarget + 'static>(target: T) -> Self {
        MirrorRef::Object(Arc::new(target))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MirrorRef::Null)
    }

    /// Whether both refer to the same underlying object.
    pub fn same_object(&self, other: &MirrorRef) -> bool {
        match (self, other) {
            (MirrorRef::Null, MirrorRef::Null) => true,
            (MirrorRef::Object(a), MirrorRef::Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            _ => false,
        }
    }

    /// Key for the object itself, independent of its address.
    fn identity(&self) -> usize {
        match self {
            MirrorRef::Null => NULL_ADDRESS,
            MirrorRef::Object(target) => Arc::as_ptr(target) as *const () as usize,
        }
    }
}

impl<T: MirrorTarget + 'static> From<Arc<T>> for MirrorRef {
    fn from(target: Arc<T>) -> Self {
        MirrorRef::Object(target)
    }
}

#[derive(Debug)]
struct Table {
    entries: Vec<(usize, MirrorRef)>,
    /// address -> slot
    index: AHashMap<usize, usize>,
    /// object identity -> slot
    by_object: AHashMap<usize, usize>,
    next_mirror: usize,
}

impl Table {
    fn next_free_mirror(&mut self) -> usize {
        loop {
            let address = self.next_mirror;
            self.next_mirror = self.next_mirror.wrapping_add(1);
            if address != NULL_ADDRESS && !self.index.contains_key(&address) {
                return address;
            }
        }
    }
}

/// Address table shared by everything that talks to foreign code.
#[derive(Debug)]
pub struct MirrorRegistry {
    table: Mutex<Table>,
}

static GLOBAL: OnceLock<Arc<MirrorRegistry>> = OnceLock::new();

impl MirrorRegistry {
    /// An independent registry with room for `initial_capacity` entries
    /// before its first growth.
    pub fn new(initial_capacity: usize) -> Self {
        let capacity = initial_capacity.max(1);
        let mut entries = Vec::with_capacity(capacity);
        let mut index = AHashMap::with_capacity(capacity);
        let mut by_object = AHashMap::with_capacity(capacity);
        entries.push((NULL_ADDRESS, MirrorRef::Null));
        index.insert(NULL_ADDRESS, 0);
        by_object.insert(MirrorRef::Null.identity(), 0);
        Self {
            table: Mutex::new(Table {
                entries,
                index,
                by_object,
                next_mirror: MIRROR_ADDRESS_BASE,
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<MirrorRegistry> {
        Self::init_global(DEFAULT_REGISTRY_CAPACITY)
    }

    /// The process-wide registry, created with `initial_capacity` if this
    /// is the first use.
    pub fn init_global(initial_capacity: usize) -> Arc<MirrorRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(MirrorRegistry::new(initial_capacity)))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The address of `object`, registering it on first request.
    pub fn address_for(&self, object: &MirrorRef) -> Result<usize, BridgeError> {
        let identity = object.identity();
        let mut table = self.lock();

        if let Some(&slot) = table.by_object.get(&identity) {
            return Ok(table.entries[slot].0);
        }

        let custom = match object {
            MirrorRef::Null => None,
            MirrorRef::Object(target) => target.custom_address(),
        };
        let address = match custom {
            Some(address) if table.index.contains_key(&address) => {
                log::warn!("address {:#x} already assigned to another object", address);
                return Err(BridgeError::address_collision(address));
            }
            Some(address) => address,
            None => table.next_free_mirror(),
        };

        if table.entries.len() == table.entries.capacity() {
            let grow_by = table.entries.capacity().max(1);
            table.entries.reserve_exact(grow_by);
            log::debug!(
                "pointer registry grown to {} entries",
                table.entries.capacity()
            );
        }
        let slot = table.entries.len();
        table.entries.push((address, object.clone()));
        table.index.insert(address, slot);
        table.by_object.insert(identity, slot);
        log::debug!("registered {:?} at {:#x}", object, address);
        Ok(address)
    }

    /// The object registered at `address`, if any. Address 0 is the null
    /// object.
    pub fn object_for(&self, address: usize) -> Option<MirrorRef> {
        let table = self.lock();
        table
            .index
            .get(&address)
            .map(|&slot| table.entries[slot].1.clone())
    }

    /// Number of entries, including the null entry.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.capacity()
    }
}

impl Default for MirrorRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}
