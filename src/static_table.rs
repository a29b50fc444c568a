use alloc::alloc::handle_alloc_error;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::Chain;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::Range;
use core::ptr::NonNull;

use crate::hash_table::Iter;
use crate::hash_table::Probe;
use crate::hasher::DefaultHashBuilder;
use crate::hasher::secondary_hash;
use crate::layout::TableLayout;
use crate::layout::value_array_offset;

/// A hash table with a fixed number of slots, chosen at construction.
///
/// Uses the same key-array-then-value-array allocation and empty-key marking
/// as [`HashTable`](crate::HashTable), but never grows on its own: when every
/// slot is taken, [`insert`](Self::insert) hands the entry back. Probing is
/// linear over the whole table, wrapping around the end, starting from the
/// secondary hash modulo the capacity. Removal leaves a plain vacant slot
/// behind and lookups scan past vacant slots, so a miss costs a full pass over
/// the table. The capacity does not have to be a power of two.
///
/// ## Example
///
/// ```rust
/// use cacheline_map::StaticTable;
///
/// let mut table = StaticTable::new(2, u32::MAX);
/// assert_eq!(table.insert(1, 'a'), Ok(true));
/// assert_eq!(table.insert(2, 'b'), Ok(true));
/// assert_eq!(table.insert(1, 'x'), Ok(false));
///
/// // Full: the entry comes back.
/// assert_eq!(table.insert(3, 'c'), Err((3, 'c')));
///
/// assert_eq!(table.remove(&1), Some('a'));
/// assert_eq!(table.insert(3, 'c'), Ok(true));
/// ```
pub struct StaticTable<K, V, S = DefaultHashBuilder>
where
    K: Eq,
{
    keys: NonNull<K>,
    capacity: usize,
    empty_key: K,
    hash_builder: S,

    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The table owns its keys and values exclusively, like a `Vec`.
unsafe impl<K: Eq + Send, V: Send, S: Send> Send for StaticTable<K, V, S> {}

// SAFETY: Shared access only hands out shared references to keys and values.
unsafe impl<K: Eq + Sync, V: Sync, S: Sync> Sync for StaticTable<K, V, S> {}

impl<K, V, S> Debug for StaticTable<K, V, S>
where
    K: Eq + Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Clone for StaticTable<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        let mut table = Self::with_hasher(
            self.capacity,
            self.empty_key.clone(),
            self.hash_builder.clone(),
        );
        for (key, value) in self.iter() {
            let inserted = table.insert(key.clone(), value.clone());
            debug_assert!(matches!(inserted, Ok(true)));
        }
        table
    }
}

impl<K: Eq, V, S> Drop for StaticTable<K, V, S> {
    fn drop(&mut self) {
        let layout = TableLayout::new::<K, V>(self.capacity);
        let (keys, values, empty_key) = self.slots_mut();

        // SAFETY: Values are initialized exactly where the key is not the
        // empty key, every key slot is initialized, and the allocation was
        // made with `layout`.
        unsafe {
            if core::mem::needs_drop::<V>() {
                for (key, value) in keys.iter().zip(values.iter_mut()) {
                    if key != empty_key {
                        value.assume_init_drop();
                    }
                }
            }
            core::ptr::drop_in_place(keys as *mut [K]);

            alloc::alloc::dealloc(self.keys.as_ptr().cast(), layout.layout());
        }
    }
}

impl<K, V> StaticTable<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty table with exactly `capacity` slots and the default
    /// hasher.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, empty_key: K) -> Self {
        Self::with_hasher(capacity, empty_key, DefaultHashBuilder::default())
    }
}

impl<K: Eq, V, S> StaticTable<K, V, S> {
    const KEY_IS_SIZED: () = assert!(size_of::<K>() != 0, "keys must not be zero-sized");

    /// Returns the number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the key that marks vacant slots.
    pub fn empty_key(&self) -> &K {
        &self.empty_key
    }

    /// Returns a reference to the table's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of entries. Scans every slot.
    #[doc(alias = "count")]
    pub fn len(&self) -> usize {
        self.keys()
            .iter()
            .filter(|&key| *key != self.empty_key)
            .count()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.keys().iter().all(|key| *key == self.empty_key)
    }

    /// Returns `true` if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.keys().iter().all(|key| *key != self.empty_key)
    }

    /// Returns an iterator over the entries in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self.keys(), self.values(), &self.empty_key)
    }

    /// Calls `f` with every entry in slot order.
    pub fn for_each(&mut self, mut f: impl FnMut(&K, &mut V)) {
        let (keys, values, empty_key) = self.slots_mut();
        for (key, value) in keys.iter().zip(values.iter_mut()) {
            if key != empty_key {
                // SAFETY: The slot is occupied, so its value is initialized.
                f(key, unsafe { value.assume_init_mut() });
            }
        }
    }

    /// Calls `f` with every value in slot order.
    pub fn for_each_value(&mut self, mut f: impl FnMut(&mut V)) {
        self.for_each(|_, value| f(value));
    }

    fn values_ptr(keys: NonNull<K>, capacity: usize) -> *mut MaybeUninit<V> {
        let offset = value_array_offset(capacity * size_of::<K>(), align_of::<V>());
        // SAFETY: `TableLayout` places the value array at this offset.
        unsafe { keys.as_ptr().cast::<u8>().add(offset).cast() }
    }

    #[inline]
    fn keys(&self) -> &[K] {
        // SAFETY: The allocation starts with `capacity` initialized keys.
        unsafe { core::slice::from_raw_parts(self.keys.as_ptr(), self.capacity) }
    }

    #[inline]
    fn values(&self) -> &[MaybeUninit<V>] {
        // SAFETY: The value array holds `capacity` possibly-uninit slots.
        unsafe {
            core::slice::from_raw_parts(Self::values_ptr(self.keys, self.capacity), self.capacity)
        }
    }

    #[inline]
    fn slots_mut(&mut self) -> (&mut [K], &mut [MaybeUninit<V>], &K) {
        let values = Self::values_ptr(self.keys, self.capacity);
        // SAFETY: The key and value arrays are disjoint parts of an allocation
        // owned exclusively through `&mut self`.
        unsafe {
            (
                core::slice::from_raw_parts_mut(self.keys.as_ptr(), self.capacity),
                core::slice::from_raw_parts_mut(values, self.capacity),
                &self.empty_key,
            )
        }
    }
}

impl<K, V, S> StaticTable<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// Creates an empty table with exactly `capacity` slots that hashes keys
    /// with `hash_builder`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_hasher(capacity: usize, empty_key: K, hash_builder: S) -> Self {
        let () = Self::KEY_IS_SIZED;
        assert!(capacity > 0, "a static table needs at least one slot");

        Self {
            keys: Self::allocate(capacity, &empty_key),
            capacity,
            empty_key,
            hash_builder,
            _phantom: PhantomData,
        }
    }

    fn allocate(capacity: usize, empty_key: &K) -> NonNull<K> {
        let layout = TableLayout::new::<K, V>(capacity);

        // SAFETY: The layout is non-empty (non-zero capacity and sized keys),
        // allocation failure is handled, and each write is in the key array.
        unsafe {
            let raw = alloc::alloc::alloc(layout.layout()).cast::<K>();
            let Some(keys) = NonNull::new(raw) else {
                handle_alloc_error(layout.layout());
            };
            for index in 0..capacity {
                keys.add(index).write(empty_key.clone());
            }
            keys
        }
    }

    /// Slot indices in probe order for `key`: its home slot to the end, then
    /// wrapping around to the beginning.
    #[inline]
    fn probe_order(&self, key: &K) -> Chain<Range<usize>, Range<usize>> {
        let home = (secondary_hash(self.hash_builder.hash_one(key)) % self.capacity as u64) as usize;
        (home..self.capacity).chain(0..home)
    }

    fn probe(&self, key: &K) -> Probe {
        let keys = self.keys();
        let mut vacant = None;
        for index in self.probe_order(key) {
            if keys[index] == *key {
                return Probe::Present(index);
            }
            if vacant.is_none() && keys[index] == self.empty_key {
                vacant = Some(index);
            }
        }
        vacant.map_or(Probe::Exhausted, Probe::Vacant)
    }

    fn find_index(&self, key: &K) -> Option<usize> {
        if *key == self.empty_key {
            return None;
        }
        let keys = self.keys();
        self.probe_order(key).find(|&index| keys[index] == *key)
    }

    /// Returns a reference to the value stored for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_index(key)?;
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { self.values()[index].assume_init_ref() })
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find_index(key)?;
        let (_, values, _) = self.slots_mut();
        // SAFETY: `find_index` only returns occupied slots.
        Some(unsafe { values[index].assume_init_mut() })
    }

    /// Returns `true` if the table holds an entry for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_index(key).is_some()
    }

    fn occupy(&mut self, index: usize, key: K, value: V) {
        let (keys, values, _) = self.slots_mut();
        keys[index] = key;
        values[index].write(value);
    }

    /// Inserts `value` under `key`.
    ///
    /// Returns `Ok(true)` if inserted and `Ok(false)` if `key` is already
    /// present or is the empty key (the table is left untouched). Returns the
    /// entry in `Err` when the key is absent and no slot is vacant.
    pub fn insert(&mut self, key: K, value: V) -> Result<bool, (K, V)> {
        if key == self.empty_key {
            return Ok(false);
        }
        match self.probe(&key) {
            Probe::Present(_) => Ok(false),
            Probe::Vacant(index) => {
                self.occupy(index, key, value);
                Ok(true)
            }
            Probe::Exhausted => Err((key, value)),
        }
    }

    /// Inserts the value produced by `make` under `key`, calling `make` only
    /// if the key is actually inserted.
    ///
    /// Returns the key in `Err` when it is absent and no slot is vacant.
    pub fn emplace(&mut self, key: K, make: impl FnOnce() -> V) -> Result<bool, K> {
        if key == self.empty_key {
            return Ok(false);
        }
        match self.probe(&key) {
            Probe::Present(_) => Ok(false),
            Probe::Vacant(index) => {
                self.occupy(index, key, make());
                Ok(true)
            }
            Probe::Exhausted => Err(key),
        }
    }

    /// Removes the entry for `key`, returning its value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::StaticTable;
    ///
    /// let mut table = StaticTable::new(8, 0u64);
    /// table.insert(4, "four").unwrap();
    ///
    /// assert_eq!(table.remove(&4), Some("four"));
    /// assert_eq!(table.remove(&4), None);
    /// assert!(table.is_empty());
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.find_index(key)?;
        let (keys, values, empty_key) = self.slots_mut();

        keys[index] = empty_key.clone();
        // SAFETY: The slot was occupied and is now marked vacant, so the value
        // is read out exactly once.
        Some(unsafe { values[index].assume_init_read() })
    }

    /// Removes every entry, keeping the capacity.
    pub fn clear(&mut self) {
        self.drain();
    }

    /// Removes every entry, yielding them in slot order.
    ///
    /// Entries not consumed before the iterator is dropped are dropped with
    /// it; the table is empty afterwards either way.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::StaticTable;
    ///
    /// let mut table = StaticTable::new(4, 0u8);
    /// table.insert(1, 10).unwrap();
    /// table.insert(2, 20).unwrap();
    ///
    /// let mut drained: Vec<_> = table.drain().collect();
    /// drained.sort();
    /// assert_eq!(drained, [(1, 10), (2, 20)]);
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        let (keys, values, empty_key) = self.slots_mut();
        Drain {
            keys,
            values,
            empty_key,
            index: 0,
        }
    }

    /// Moves every entry into a new allocation of `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or smaller than the number of entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::StaticTable;
    ///
    /// let mut table = StaticTable::new(1, 0u32);
    /// table.insert(1, ()).unwrap();
    /// assert!(table.insert(2, ()).is_err());
    ///
    /// table.resize(3);
    /// assert_eq!(table.insert(2, ()), Ok(true));
    /// assert!(table.contains_key(&1));
    /// ```
    pub fn resize(&mut self, capacity: usize) {
        let len = self.len();
        assert!(
            capacity > 0 && capacity >= len,
            "cannot fit {len} entries into {capacity} slots"
        );

        let old_keys = self.keys;
        let old_capacity = self.capacity;
        let old_values = Self::values_ptr(old_keys, old_capacity);
        let old_layout = TableLayout::new::<K, V>(old_capacity);

        self.keys = Self::allocate(capacity, &self.empty_key);
        self.capacity = capacity;

        for index in 0..old_capacity {
            // SAFETY: Every old key slot is initialized, and the matching value
            // is initialized when the key is not the empty key. Each is moved
            // out exactly once.
            unsafe {
                let key = old_keys.add(index).read();
                if key == self.empty_key {
                    continue;
                }
                let value = old_values.add(index).read().assume_init();
                let inserted = self.insert(key, value);
                debug_assert!(matches!(inserted, Ok(true)));
            }
        }

        // SAFETY: The old allocation was made with `old_layout` and holds no
        // live values anymore.
        unsafe {
            alloc::alloc::dealloc(old_keys.as_ptr().cast(), old_layout.layout());
        }
    }
}

/// A draining iterator over the entries of a [`StaticTable`].
///
/// Created by [`StaticTable::drain`].
pub struct Drain<'a, K, V>
where
    K: Eq + Clone,
{
    keys: &'a mut [K],
    values: &'a mut [MaybeUninit<V>],
    empty_key: &'a K,
    index: usize,
}

impl<K: Eq + Clone, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.keys.len() {
            let index = self.index;
            self.index += 1;

            if self.keys[index] != *self.empty_key {
                let key = core::mem::replace(&mut self.keys[index], self.empty_key.clone());
                // SAFETY: The slot was occupied and is now marked vacant.
                let value = unsafe { self.values[index].assume_init_read() };
                return Some((key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len() - self.index))
    }
}

impl<K: Eq + Clone, V> Drop for Drain<'_, K, V> {
    fn drop(&mut self) {
        self.by_ref().for_each(drop);
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::cell::Cell;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher13;

    use super::*;
    use crate::hasher::BuildIdentityHasher;

    #[derive(Clone)]
    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn random() -> Self {
            Self {
                k0: OsRng.try_next_u64().unwrap_or(1),
                k1: OsRng.try_next_u64().unwrap_or(2),
            }
        }
    }

    impl BuildHasher for HashState {
        type Hasher = SipHasher13;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher13::new_with_keys(self.k0, self.k1)
        }
    }

    fn identity_table(capacity: usize) -> StaticTable<u64, u64, BuildIdentityHasher> {
        StaticTable::with_hasher(capacity, u64::MAX, BuildIdentityHasher)
    }

    fn home<V, S: BuildHasher>(table: &StaticTable<u64, V, S>, key: u64) -> usize {
        table.probe_order(&key).next().unwrap()
    }

    #[test]
    fn fills_every_slot_then_rejects() {
        let mut table = identity_table(5);
        for k in 0..5 {
            assert_eq!(table.insert(k, k * 10), Ok(true));
        }
        assert!(table.is_full());
        assert_eq!(table.len(), 5);
        assert_eq!(table.insert(99, 990), Err((99, 990)));
        assert_eq!(table.emplace(99, || unreachable!()), Err(99));

        for k in 0..5 {
            assert_eq!(table.get(&k), Some(&(k * 10)));
        }
    }

    #[test]
    fn probing_wraps_around_the_end() {
        let mut table = identity_table(7);
        let last = (0..).find(|&k| home(&table, k) == 6).unwrap();
        let next = (last + 1..).find(|&k| home(&table, k) == 6).unwrap();

        table.insert(last, 1).unwrap();
        table.insert(next, 2).unwrap();
        assert_eq!(table.keys()[6], last);
        assert_eq!(table.keys()[0], next);
        assert_eq!(table.get(&next), Some(&2));
    }

    #[test]
    fn lookups_scan_past_vacated_slots() {
        let mut table = identity_table(4);
        let (a, b) = (1, 5);
        assert_eq!(home(&table, a), home(&table, b));

        table.insert(a, 10).unwrap();
        table.insert(b, 50).unwrap();
        assert_eq!(table.remove(&a), Some(10));

        assert_eq!(table.get(&b), Some(&50));
        // The vacated home slot must not admit a second copy of `b`.
        assert_eq!(table.insert(b, 51), Ok(false));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&b), Some(&50));
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut table = identity_table(3);
        assert_eq!(table.insert(u64::MAX, 1), Ok(false));
        assert!(table.is_empty());
        assert!(table.get(&u64::MAX).is_none());
        assert!(table.remove(&u64::MAX).is_none());
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn zero_capacity_is_fatal() {
        let _ = identity_table(0);
    }

    #[test]
    fn string_values_with_keyed_hasher() {
        let mut table = StaticTable::with_hasher(64, 0u32, HashState::random());
        for k in 1..=64u32 {
            assert_eq!(table.insert(k, k.to_string()), Ok(true));
        }
        for k in 1..=64u32 {
            assert_eq!(table.get(&k), Some(&k.to_string()));
        }
        table.get_mut(&3).unwrap().push_str("rd");
        assert_eq!(table.get(&3).map(String::as_str), Some("3rd"));

        table.for_each_value(|v| v.insert(0, '#'));
        assert_eq!(table.get(&10).map(String::as_str), Some("#10"));
    }

    #[test]
    fn drain_empties_the_table() {
        let mut table = identity_table(16);
        for k in 0..10 {
            table.insert(k, k + 100).unwrap();
        }

        let mut drained: Vec<_> = table.drain().collect();
        drained.sort();
        assert_eq!(drained, (0..10).map(|k| (k, k + 100)).collect::<Vec<_>>());
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 16);
    }

    #[test]
    fn dropping_a_partial_drain_drops_the_rest() {
        let live = Rc::new(Cell::new(0usize));
        struct Counted(Rc<Cell<usize>>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let mut table = StaticTable::with_hasher(8, 0u32, HashState::random());
        for k in 1..=6 {
            assert!(table.insert(k, Counted(live.clone())).is_ok());
        }

        let mut drain = table.drain();
        drop(drain.next());
        drop(drain);
        assert_eq!(live.get(), 6);
        assert!(table.is_empty());
    }

    #[test]
    fn clear_and_reuse() {
        let mut table = identity_table(4);
        for k in 0..4 {
            table.insert(k, k).unwrap();
        }
        table.clear();
        assert!(table.is_empty());
        table.clear();
        for k in 10..14 {
            assert_eq!(table.insert(k, k), Ok(true));
        }
    }

    #[test]
    fn resize_keeps_entries() {
        let mut table = identity_table(3);
        for k in 0..3 {
            table.insert(k, k * 2).unwrap();
        }

        table.resize(10);
        assert_eq!(table.capacity(), 10);
        for k in 0..3 {
            assert_eq!(table.get(&k), Some(&(k * 2)));
        }

        table.remove(&1);
        table.resize(2);
        assert!(table.is_full());
        assert_eq!(table.get(&2), Some(&4));
    }

    #[test]
    #[should_panic(expected = "cannot fit")]
    fn resize_below_len_is_fatal() {
        let mut table = identity_table(3);
        for k in 0..3 {
            table.insert(k, k).unwrap();
        }
        table.resize(2);
    }

    #[test]
    fn clone_and_debug() {
        let mut table = identity_table(2);
        table.insert(7, 70).unwrap();

        let mut copy = table.clone();
        copy.insert(8, 80).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(copy.len(), 2);
        assert_eq!(alloc::format!("{table:?}"), "{7: 70}");
    }
}
