//! Generic open-addressing hash map.
//!
//! Linear probing over a fixed slot array allocated through a
//! [`RawAllocator`], with key/value behavior supplied by [`KeyOps`] and
//! [`ValueOps`] policies.
//!
//! - Grows to `ceil(capacity * 1.6)` when the load factor is at least 0.75
//!   before an insert.
//! - Shrinks to `ceil(capacity / 1.6)` (never below 8) when the load factor is
//!   at most 0.25 after a removal.
//! - Removal leaves a tombstone so probe chains through the slot stay intact.
//!   Resizing drops tombstones and re-places entries by their cached hash.

mod hash;
mod ops;

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;

use crate::allocators::{RawAllocator, SystemAllocator, MIN_ALIGN};

pub use hash::{sip_hash, MapSeed};
pub use ops::{CloneValue, KeyDisplay, KeyOps, PtrKey, StrKey, StrValue, ValueDisplay, ValueOps};

/// Capacity used by [`Map::new_in`].
pub const DEFAULT_CAPACITY: usize = 16;

/// Capacity the map never shrinks below.
pub const MIN_CAPACITY: usize = 8;

const GROW_LOAD_FACTOR: f64 = 0.75;
const SHRINK_LOAD_FACTOR: f64 = 0.25;

/// A map keyed by address.
pub type PtrMap<V, A = SystemAllocator> = Map<PtrKey, V, A>;

/// A map keyed by string content.
pub type StrMap<V, A = SystemAllocator> = Map<StrKey, V, A>;

/// Map errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// The allocator returned null for slot storage.
    #[error("map storage allocation of {bytes} bytes failed")]
    AllocFailed { bytes: usize },
    /// The next capacity does not fit in `usize`.
    #[error("map capacity overflow growing from {capacity} slots")]
    CapacityOverflow { capacity: usize },
    /// Slots need more alignment than a [`RawAllocator`] guarantees.
    #[error("map slots need {align}-byte alignment, more than the allocator guarantees")]
    Unaligned { align: usize },
}

/// Life of a slot, as shown by [`Map::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotLife {
    Empty,
    Alive,
    Tombstone,
}

impl SlotLife {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY",
            Self::Alive => "ALIVE",
            Self::Tombstone => "TOMB",
        }
    }
}

enum Slot<K, V> {
    Empty,
    Alive { key: K, value: V, hash: u64 },
    Tombstone,
}

impl<K, V> Slot<K, V> {
    fn life(&self) -> SlotLife {
        match self {
            Slot::Empty => SlotLife::Empty,
            Slot::Alive { .. } => SlotLife::Alive,
            Slot::Tombstone => SlotLife::Tombstone,
        }
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
}

/// Open-addressing hash map with pluggable policies and allocator.
pub struct Map<K: KeyOps, V: ValueOps, A: RawAllocator = SystemAllocator> {
    slots: NonNull<Slot<K::Stored, V::Stored>>,
    capacity: usize,
    len: usize,
    tombstones: usize,
    seed: MapSeed,
    alloc: A,
    _owns: PhantomData<Slot<K::Stored, V::Stored>>,
    /// Prevents Send/Sync - the map is single-threaded
    _not_send_sync: PhantomData<*const ()>,
}

impl<K: KeyOps, V: ValueOps> Map<K, V, SystemAllocator> {
    /// Create a map on the system heap with the default capacity.
    pub fn new() -> Result<Self, MapError> {
        Self::new_in(SystemAllocator)
    }

    /// Create a map on the system heap.
    pub fn with_capacity(capacity: usize) -> Result<Self, MapError> {
        Self::with_capacity_in(capacity, SystemAllocator)
    }
}

impl<K: KeyOps, V: ValueOps, A: RawAllocator> Map<K, V, A> {
    /// Create a map with the default capacity and fixed seed.
    pub fn new_in(alloc: A) -> Result<Self, MapError> {
        Self::with_capacity_in(DEFAULT_CAPACITY, alloc)
    }

    /// Create a map with the fixed seed. Capacity is raised to at least 8.
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self, MapError> {
        Self::with_capacity_and_seed_in(capacity, MapSeed::FIXED, alloc)
    }

    /// Create a map hashing with a caller-supplied seed.
    pub fn with_capacity_and_seed_in(
        capacity: usize,
        seed: MapSeed,
        alloc: A,
    ) -> Result<Self, MapError> {
        let capacity = capacity.max(MIN_CAPACITY);
        let slots = Self::alloc_slots(&alloc, capacity)?;
        Ok(Self {
            slots,
            capacity,
            len: 0,
            tombstones: 0,
            seed,
            alloc,
            _owns: PhantomData,
            _not_send_sync: PhantomData,
        })
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live entries over slots.
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }

    pub fn seed(&self) -> MapSeed {
        self.seed
    }

    /// Look up a key.
    pub fn get(&self, key: &K::Key) -> Option<&V::Value> {
        let index = self.find(key)?;
        match &self.slots()[index] {
            Slot::Alive { value, .. } => Some(V::borrow(value)),
            _ => None,
        }
    }

    /// Look up a key for in-place mutation of its stored value.
    pub fn get_mut(&mut self, key: &K::Key) -> Option<&mut V::Stored> {
        let index = self.find(key)?;
        match &mut self.slots_mut()[index] {
            Slot::Alive { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &K::Key) -> bool {
        self.find(key).is_some()
    }

    /// Insert or overwrite, copying `value` through the value policy.
    pub fn set(&mut self, key: &K::Key, value: &V::Value) -> Result<(), MapError> {
        self.set_owned(key, V::copy(value))
    }

    /// Insert or overwrite with an already-owned value.
    ///
    /// On overwrite the previous value is released through the value policy.
    /// If room cannot be made the value is released before the error returns.
    pub fn set_owned(&mut self, key: &K::Key, value: V::Stored) -> Result<(), MapError> {
        if let Err(err) = self.reserve_one() {
            V::release(value);
            return Err(err);
        }

        let hash = K::hash(key, self.seed);
        match self.probe(hash, key) {
            Probe::Found(index) => {
                if let Slot::Alive { value: slot, .. } = &mut self.slots_mut()[index] {
                    let old = mem::replace(slot, value);
                    V::release(old);
                }
            }
            Probe::Vacant(index) => {
                let slot = &mut self.slots_mut()[index];
                let reused_tombstone = matches!(slot, Slot::Tombstone);
                *slot = Slot::Alive {
                    key: K::copy(key),
                    value,
                    hash,
                };
                if reused_tombstone {
                    self.tombstones -= 1;
                }
                self.len += 1;
            }
        }
        Ok(())
    }

    /// Remove a key, releasing key and value. Returns whether it was present.
    pub fn remove(&mut self, key: &K::Key) -> bool {
        match self.take(key) {
            Some(value) => {
                V::release(value);
                true
            }
            None => false,
        }
    }

    /// Remove a key and hand its value back instead of releasing it.
    pub fn take(&mut self, key: &K::Key) -> Option<V::Stored> {
        let index = self.find(key)?;
        let slot = mem::replace(&mut self.slots_mut()[index], Slot::Tombstone);
        let Slot::Alive { key, value, .. } = slot else {
            return None;
        };
        K::release(key);
        self.len -= 1;
        self.tombstones += 1;
        self.maybe_shrink();
        Some(value)
    }

    /// Iterate live entries in storage order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots().iter(),
        }
    }

    /// Visit every live entry in storage order.
    pub fn for_each<F>(&self, mut callback: F)
    where
        F: FnMut(&K::Key, &V::Value),
    {
        for (key, value) in self.iter() {
            callback(key, value);
        }
    }

    /// Release every entry, keeping the current capacity.
    pub fn clear(&mut self) {
        for slot in self.slots_mut() {
            if let Slot::Alive { key, value, .. } = mem::replace(slot, Slot::Empty) {
                K::release(key);
                V::release(value);
            }
        }
        self.len = 0;
        self.tombstones = 0;
    }

    /// Render every slot as a `|KEY|VAL|LIFE|` table.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("|{:>10}|{:>10}|{:>6}|\n", "KEY", "VAL", "LIFE"));
        out.push_str("|----------|----------|------|\n");
        for slot in self.slots() {
            let life = slot.life().as_str();
            match slot {
                Slot::Alive { key, value, .. } => {
                    let key = KeyDisplay::<K>(K::borrow(key)).to_string();
                    let value = ValueDisplay::<V>(V::borrow(value)).to_string();
                    out.push_str(&format!("|{:>10}|{:>10}|{:>6}|\n", key, value, life));
                }
                _ => out.push_str(&format!("|{:>10}|{:>10}|{:>6}|\n", "NULL", "n/a", life)),
            }
        }
        log::debug!(target: "memtrack::map", "\n{}", out);
        out
    }

    /// Slot life by index, for inspecting probe layout.
    pub fn slot_life(&self, index: usize) -> Option<SlotLife> {
        self.slots().get(index).map(Slot::life)
    }

    fn slots(&self) -> &[Slot<K::Stored, V::Stored>] {
        // SAFETY: `slots` points to `capacity` initialized slots owned by self.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr(), self.capacity) }
    }

    fn slots_mut(&mut self) -> &mut [Slot<K::Stored, V::Stored>] {
        // SAFETY: as in `slots`, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.slots.as_ptr(), self.capacity) }
    }

    fn find(&self, key: &K::Key) -> Option<usize> {
        let hash = K::hash(key, self.seed);
        let slots = self.slots();
        let mut index = index_for(hash, self.capacity);
        for _ in 0..self.capacity {
            match &slots[index] {
                Slot::Empty => return None,
                Slot::Alive { key: stored, hash: h, .. } if *h == hash && K::eq(stored, key) => {
                    return Some(index)
                }
                _ => {}
            }
            index = (index + 1) % self.capacity;
        }
        None
    }

    fn probe(&self, hash: u64, key: &K::Key) -> Probe {
        let slots = self.slots();
        let mut index = index_for(hash, self.capacity);
        let mut first_tombstone = None;
        for _ in 0..self.capacity {
            match &slots[index] {
                Slot::Empty => return Probe::Vacant(first_tombstone.unwrap_or(index)),
                Slot::Tombstone => {
                    first_tombstone.get_or_insert(index);
                }
                Slot::Alive { key: stored, hash: h, .. } => {
                    if *h == hash && K::eq(stored, key) {
                        return Probe::Found(index);
                    }
                }
            }
            index = (index + 1) % self.capacity;
        }
        match first_tombstone {
            Some(index) => Probe::Vacant(index),
            None => unreachable!("reserve_one keeps at least one empty slot"),
        }
    }

    /// Make room for one more entry before probing.
    fn reserve_one(&mut self) -> Result<(), MapError> {
        if self.load_factor() >= GROW_LOAD_FACTOR {
            let new_capacity = grown_capacity(self.capacity).ok_or(MapError::CapacityOverflow {
                capacity: self.capacity,
            })?;
            self.resize(new_capacity)
        } else if (self.len + self.tombstones) as f64 / self.capacity as f64 >= GROW_LOAD_FACTOR {
            // Enough live room, but tombstones are eating the empty slots.
            self.resize(self.capacity)
        } else {
            Ok(())
        }
    }

    fn maybe_shrink(&mut self) {
        if self.load_factor() > SHRINK_LOAD_FACTOR || self.capacity <= MIN_CAPACITY {
            return;
        }
        let new_capacity = shrunk_capacity(self.capacity);
        if new_capacity == self.capacity {
            return;
        }
        if let Err(err) = self.resize(new_capacity) {
            log::debug!(target: "memtrack::map", "shrink skipped: {}", err);
        }
    }

    fn resize(&mut self, new_capacity: usize) -> Result<(), MapError> {
        let new_slots = Self::alloc_slots(&self.alloc, new_capacity)?;
        // SAFETY: freshly allocated and initialized with `new_capacity` empty slots.
        let fresh = unsafe { std::slice::from_raw_parts_mut(new_slots.as_ptr(), new_capacity) };

        for slot in self.slots_mut() {
            if let Slot::Alive { key, value, hash } = mem::replace(slot, Slot::Empty) {
                let mut index = index_for(hash, new_capacity);
                while !matches!(fresh[index], Slot::Empty) {
                    index = (index + 1) % new_capacity;
                }
                fresh[index] = Slot::Alive { key, value, hash };
            }
        }

        log::trace!(
            target: "memtrack::map",
            "resized {} -> {} slots ({} live, {} tombstones dropped)",
            self.capacity,
            new_capacity,
            self.len,
            self.tombstones
        );

        // SAFETY: every old slot is now Empty, so nothing is left to drop.
        unsafe { Self::free_slots(&self.alloc, self.slots) };
        self.slots = new_slots;
        self.capacity = new_capacity;
        self.tombstones = 0;
        Ok(())
    }

    fn alloc_slots(
        alloc: &A,
        capacity: usize,
    ) -> Result<NonNull<Slot<K::Stored, V::Stored>>, MapError> {
        let align = mem::align_of::<Slot<K::Stored, V::Stored>>();
        if align > MIN_ALIGN {
            return Err(MapError::Unaligned { align });
        }

        let bytes = capacity
            .checked_mul(mem::size_of::<Slot<K::Stored, V::Stored>>())
            .ok_or(MapError::CapacityOverflow { capacity })?;
        let raw = alloc.malloc(bytes) as *mut Slot<K::Stored, V::Stored>;
        let slots = NonNull::new(raw).ok_or(MapError::AllocFailed { bytes })?;

        for i in 0..capacity {
            // SAFETY: `raw` has room for `capacity` slots.
            unsafe { slots.as_ptr().add(i).write(Slot::Empty) };
        }
        Ok(slots)
    }

    /// # Safety
    ///
    /// `slots` must come from `alloc_slots` on the same allocator and hold no
    /// live entries.
    unsafe fn free_slots(alloc: &A, slots: NonNull<Slot<K::Stored, V::Stored>>) {
        alloc.free(slots.as_ptr() as *mut u8);
    }
}

impl<K: KeyOps, V: ValueOps, A: RawAllocator> Drop for Map<K, V, A> {
    fn drop(&mut self) {
        self.clear();
        // SAFETY: cleared above; storage came from alloc_slots.
        unsafe { Self::free_slots(&self.alloc, self.slots) };
    }
}

impl<K: KeyOps, V: ValueOps, A: RawAllocator> fmt::Debug for Map<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| {
                (
                    KeyDisplay::<K>(k).to_string(),
                    ValueDisplay::<V>(v).to_string(),
                )
            }))
            .finish()
    }
}

impl<'a, K: KeyOps + 'a, V: ValueOps + 'a, A: RawAllocator> IntoIterator for &'a Map<K, V, A> {
    type Item = (&'a K::Key, &'a V::Value);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over live entries in storage order.
pub struct Iter<'a, K: KeyOps + 'a, V: ValueOps + 'a> {
    slots: std::slice::Iter<'a, Slot<K::Stored, V::Stored>>,
}

impl<'a, K: KeyOps + 'a, V: ValueOps + 'a> Iterator for Iter<'a, K, V> {
    type Item = (&'a K::Key, &'a V::Value);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Alive { key, value, .. } = slot {
                return Some((K::borrow(key), V::borrow(value)));
            }
        }
        None
    }
}

#[inline]
fn index_for(hash: u64, capacity: usize) -> usize {
    (hash % capacity as u64) as usize
}

/// `ceil(capacity * 1.6)`, or `None` on overflow.
fn grown_capacity(capacity: usize) -> Option<usize> {
    Some(capacity.checked_mul(8)?.checked_add(4)? / 5)
}

/// `ceil(capacity / 1.6)`, floored at [`MIN_CAPACITY`].
fn shrunk_capacity(capacity: usize) -> usize {
    let target = capacity / 8 * 5 + ((capacity % 8) * 5 + 7) / 8;
    target.max(MIN_CAPACITY)
}
