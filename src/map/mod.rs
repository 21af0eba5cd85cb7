//! Integer-keyed registry.
//!
//! [`IntMap`] maps a raw socket-handle value to the state owning that
//! socket. The operating system guarantees live handles are unique, which
//! shapes the whole design: insertion never checks for a pre-existing key,
//! the handle value itself is the hash, and removal verifies value identity
//! to guard against a stale reference racing a handle that the OS has
//! already reused for a new connection.
//!
//! Each instance is owned by exactly one shard thread and is not
//! synchronized.

use crate::error::UNREACHED;

/// A chained hash table keyed by a raw handle integer.
///
/// Buckets are fixed at construction (power of two) and index into a slot
/// arena; chains are doubly linked by slot index, so unlinking a slot is
/// O(1) once it is found. Freed slots are recycled through a free list.
pub struct IntMap<T> {
    /// Head slot index per bucket.
    buckets: Vec<Option<usize>>,
    mask: i32,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    count: usize,
}

struct Slot<T> {
    key: i32,
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<T> IntMap<T> {
    /// Creates a map with `size` buckets.
    ///
    /// # Panics
    ///
    /// Panics unless `size` is a power of two; the bucket index is computed
    /// with a mask, not a modulo.
    pub fn new(size: usize) -> Self {
        assert!(
            size.count_ones() == 1 && size <= i32::MAX as usize,
            "{UNREACHED}: bucket count must be a power of two"
        );
        Self {
            buckets: vec![None; size],
            mask: size as i32 - 1,
            slots: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }

    fn bucket(&self, key: i32) -> usize {
        (key & self.mask) as usize
    }

    fn slot(&self, index: usize) -> &Slot<T> {
        self.slots[index].as_ref().expect(UNREACHED)
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot<T> {
        self.slots[index].as_mut().expect(UNREACHED)
    }

    fn find(&self, key: i32) -> Option<usize> {
        let mut cursor = self.buckets[self.bucket(key)];
        while let Some(index) = cursor {
            let slot = self.slot(index);
            if slot.key == key {
                return Some(index);
            }
            cursor = slot.next;
        }
        None
    }

    pub fn get(&self, key: i32) -> Option<&T> {
        self.find(key).map(|i| &self.slot(i).value)
    }

    pub fn get_mut(&mut self, key: i32) -> Option<&mut T> {
        let index = self.find(key)?;
        Some(&mut self.slot_mut(index).value)
    }

    /// Prepends an entry to its bucket chain.
    ///
    /// No duplicate-key check is performed: handles are unique while live,
    /// so a colliding `put` can only come from a caller defect, and lookups
    /// would still find the newest entry first.
    pub fn put(&mut self, key: i32, value: T) {
        let bucket = self.bucket(key);
        let head = self.buckets[bucket];

        let slot = Slot {
            key,
            value,
            prev: None,
            next: head,
        };
        let index = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = head {
            self.slot_mut(old_head).prev = Some(index);
        }
        self.buckets[bucket] = Some(index);
        self.count += 1;
    }

    /// Swaps the value stored under `key` for `new`, provided the current
    /// value satisfies `matches`. Returns the displaced value.
    ///
    /// # Panics
    ///
    /// Panics when no matching entry exists: callers use this for
    /// transitions that must happen exactly once (sentry → protocol
    /// promotion), so a missing expected value is a logic defect.
    pub fn replace_with(&mut self, key: i32, matches: impl Fn(&T) -> bool, new: T) -> T {
        let mut cursor = self.buckets[self.bucket(key)];
        while let Some(index) = cursor {
            let slot = self.slot_mut(index);
            if slot.key == key && matches(&slot.value) {
                return std::mem::replace(&mut slot.value, new);
            }
            cursor = slot.next;
        }
        panic!("{UNREACHED}: replace target not found");
    }

    /// Removes the entry for `key` when `matches` accepts its value,
    /// returning the value. Removal is the sole authorization to release
    /// the resources the value owns.
    ///
    /// A key match with a value mismatch returns `None` and leaves the
    /// entry intact: the caller held a stale reference to a previous owner
    /// of a reused handle.
    pub fn remove_with(&mut self, key: i32, matches: impl Fn(&T) -> bool) -> Option<T> {
        let mut cursor = self.buckets[self.bucket(key)];
        while let Some(index) = cursor {
            let slot = self.slot(index);
            if slot.key != key {
                cursor = slot.next;
                continue;
            }
            if !matches(&slot.value) {
                return None;
            }

            let slot = self.slots[index].take().expect(UNREACHED);
            match slot.prev {
                Some(prev) => self.slot_mut(prev).next = slot.next,
                None => {
                    let bucket = self.bucket(key);
                    self.buckets[bucket] = slot.next;
                }
            }
            if let Some(next) = slot.next {
                self.slot_mut(next).prev = slot.prev;
            }
            self.free.push(index);
            self.count -= 1;
            return Some(slot.value);
        }
        None
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Removes and returns every value, leaving the map empty.
    pub fn drain(&mut self) -> Vec<T> {
        let values = self
            .slots
            .iter_mut()
            .filter_map(|s| s.take().map(|s| s.value))
            .collect();
        self.buckets.fill(None);
        self.free.clear();
        self.slots.clear();
        self.count = 0;
        values
    }
}

impl<T: PartialEq> IntMap<T> {
    /// Swaps `old` for `new` under `key`; see [`replace_with`](Self::replace_with).
    pub fn replace(&mut self, key: i32, old: &T, new: T) -> T {
        self.replace_with(key, |v| v == old, new)
    }

    /// Removes `(key, value)` if both match; see [`remove_with`](Self::remove_with).
    pub fn remove(&mut self, key: i32, value: &T) -> bool {
        self.remove_with(key, |v| v == value).is_some()
    }
}
