//! Identifiers used to key capabilities and wrapped objects.

use std::cmp::Ordering;
use std::ffi::CStr;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::num::NonZeroU64;
use std::sync::atomic::AtomicU64;

/// Identifies a capability name (extension or layer) by the xxh3 hash of its bytes.
///
/// Names reported by the driver and names requested by the user hash to the same id, which lets
/// the capability registry compare them without keeping every string around.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameId(u64);

impl NameId {
    const fn hash_str_const(name: &str) -> u64 {
        xxhash_rust::const_xxh3::xxh3_64(name.as_bytes())
    }

    /// Calling this function with the same string will always return the same id.
    pub const fn from_str(name: &str) -> Self {
        Self(Self::hash_str_const(name))
    }

    pub fn from_cstr(name: &CStr) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(name.to_bytes()))
    }

    pub const fn get_raw(&self) -> u64 {
        self.0
    }
}

impl From<&CStr> for NameId {
    fn from(name: &CStr) -> Self {
        Self::from_cstr(name)
    }
}

impl Debug for NameId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("NameId({:#016X})", self.0))
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process unique id of a wrapped object. Used to order and compare contexts.
#[derive(Clone)]
pub struct ObjectId {
    name: &'static str,
    id: NonZeroU64,
}

impl ObjectId {
    pub fn new(name: &'static str) -> Self {
        let id = NEXT_OBJECT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self {
            name,
            // The counter starts at 1 and would need 2^64 allocations to wrap
            id: NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN),
        }
    }

    pub fn get_name(&self) -> &'static str {
        self.name
    }

    pub fn get_raw(&self) -> u64 {
        self.id.get()
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for ObjectId {
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl Debug for ObjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("ObjectId{{\"{}\", {}}}", self.name, self.id))
    }
}
