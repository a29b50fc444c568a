//! The growable, cacheline-bounded hash table.
//!
//! Every key is stored within two cachelines of key slots from the cacheline
//! its hash selects, so lookups have a small constant worst case. The table
//! doubles whenever an insertion finds that window full.

use alloc::alloc::handle_alloc_error;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::Range;

use crate::hasher::DefaultHashBuilder;
use crate::hasher::secondary_hash;
use crate::layout::CACHELINE;
use crate::layout::TableLayout;
use crate::layout::value_array_offset;
use crate::packed::AlignedPtr;

/// Capacity of a fresh table, as a power of two (128 slots).
const INITIAL_CAPACITY_POWER: usize = 7;

const CACHELINE_BITS: u32 = CACHELINE.trailing_zeros();

/// The backing allocation and the capacity exponent, packed into one word.
/// Table allocations are cacheline aligned, which frees the low six bits.
type Storage = AlignedPtr<u8, CACHELINE_BITS>;

#[inline(always)]
#[cfg_attr(
    not(all(target_arch = "x86_64", target_feature = "sse2")),
    allow(unused_variables)
)]
fn prefetch<T>(ptr: *const T) {
    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    // SAFETY: Prefetching is a hint; it never faults, whatever the address.
    unsafe {
        use core::arch::x86_64::*;
        _mm_prefetch(ptr as *const i8, _MM_HINT_T0);
    }
}

/// Outcome of scanning a key's probe sequence.
pub(crate) enum Probe {
    /// The key is stored at this index.
    Present(usize),
    /// The key is absent; this is the first vacant slot probed.
    Vacant(usize),
    /// The key is absent and no probed slot is vacant.
    Exhausted,
}

/// An open-addressing hash table whose lookups read at most two cachelines.
///
/// Keys live in one array and values in a second array directly after it,
/// both inside a single cacheline-aligned allocation. A key is always stored
/// within [`PROBE_LIMIT`](Self::PROBE_LIMIT) slots (two cachelines of keys)
/// of the cacheline its hash selects. When an insertion finds no room in that
/// window the table doubles, so a lookup never compares more than
/// `PROBE_LIMIT` keys. Removal repairs the window locally by pulling later
/// entries back into the freed slot.
///
/// Vacant slots are marked by an *empty key* chosen at construction. That
/// value can never be stored as a real key. The table itself is one word
/// (allocation pointer and capacity exponent packed together) plus the empty
/// key and the hasher builder.
///
/// The caller's hash is multiplied by [`GOLDEN_RATIO`](crate::GOLDEN_RATIO)
/// before use, so identity hashes on dense integer ids spread evenly.
///
/// `K` must tile a cacheline exactly: its size must be non-zero and divide
/// 64. This is checked at compile time.
///
/// The table does no synchronization. Share it between threads only behind
/// an external lock.
///
/// ## Example
///
/// ```rust
/// use cacheline_map::BuildIdentityHasher;
/// use cacheline_map::HashTable;
///
/// let mut table = HashTable::with_hasher(u64::MAX, BuildIdentityHasher);
///
/// assert!(table.insert(7, "seven"));
/// assert!(!table.insert(7, "again"));
/// assert_eq!(table.get(&7), Some(&"seven"));
///
/// assert_eq!(table.remove(&7), Some("seven"));
/// assert!(table.get(&7).is_none());
///
/// // The empty key is reserved.
/// assert!(!table.insert(u64::MAX, "never"));
/// ```
pub struct HashTable<K, V, S = DefaultHashBuilder>
where
    K: Eq,
{
    storage: Storage,
    empty_key: K,
    hash_builder: S,

    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The table owns its keys and values exclusively, like a `Vec`; the
// raw allocation pointer is never shared outside of borrows of the table.
unsafe impl<K: Eq + Send, V: Send, S: Send> Send for HashTable<K, V, S> {}

// SAFETY: Shared access only hands out shared references to keys and values.
unsafe impl<K: Eq + Sync, V: Sync, S: Sync> Sync for HashTable<K, V, S> {}

impl<K, V, S> Debug for HashTable<K, V, S>
where
    K: Eq + Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> Clone for HashTable<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        let mut table = Self::with_power(
            self.storage.num(),
            self.empty_key.clone(),
            self.hash_builder.clone(),
        );
        for (key, value) in self.iter() {
            table.insert(key.clone(), value.clone());
        }
        table
    }
}

impl<K: Eq, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        let layout = TableLayout::new::<K, V>(self.capacity());
        let (keys, values, empty_key) = self.slots_mut();

        // SAFETY: Values are initialized exactly where the key is not the
        // empty key. Every key slot is initialized. The allocation was made
        // with `layout`.
        unsafe {
            if core::mem::needs_drop::<V>() {
                for (key, value) in keys.iter().zip(values.iter_mut()) {
                    if key != empty_key {
                        value.assume_init_drop();
                    }
                }
            }
            core::ptr::drop_in_place(keys as *mut [K]);

            alloc::alloc::dealloc(self.storage.ptr(), layout.layout());
        }
    }
}

impl<K, V> HashTable<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty table with 128 slots and the default hasher.
    ///
    /// `empty_key` marks vacant slots and can never be inserted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let table: HashTable<u32, String> = HashTable::new(u32::MAX);
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), 128);
    /// ```
    pub fn new(empty_key: K) -> Self {
        Self::with_hasher(empty_key, DefaultHashBuilder::default())
    }

    /// Creates an empty table with room for at least `capacity` slots and
    /// the default hasher.
    ///
    /// Slots are not entries: depending on the key distribution the table may
    /// still grow before `capacity` entries are stored.
    pub fn with_capacity(capacity: usize, empty_key: K) -> Self {
        Self::with_capacity_and_hasher(capacity, empty_key, DefaultHashBuilder::default())
    }
}

impl<K: Eq, V, S> HashTable<K, V, S> {
    const KEYS_TILE_CACHELINE: () = assert!(
        size_of::<K>() != 0 && CACHELINE % size_of::<K>() == 0,
        "key size must evenly divide a cacheline"
    );

    /// Number of keys in one cacheline.
    pub const KEYS_PER_CACHELINE: usize = CACHELINE / size_of::<K>();

    /// Maximum number of key slots scanned by any lookup or insertion: two
    /// cachelines' worth.
    pub const PROBE_LIMIT: usize = 2 * Self::KEYS_PER_CACHELINE;

    /// Returns the number of slots in the table. Always a power of two.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        1 << self.storage.num()
    }

    /// Returns the key that marks vacant slots.
    pub fn empty_key(&self) -> &K {
        &self.empty_key
    }

    /// Returns a reference to the table's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Returns the number of entries in the table.
    ///
    /// The table keeps no counter, so this scans every key slot.
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

    /// Returns an iterator over the entries in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::BuildIdentityHasher;
    /// use cacheline_map::HashTable;
    ///
    /// let mut table = HashTable::with_hasher(0u32, BuildIdentityHasher);
    /// for id in 1..=3 {
    ///     table.insert(id, id * 10);
    /// }
    ///
    /// let mut pairs: Vec<_> = table.iter().map(|(&k, &v)| (k, v)).collect();
    /// pairs.sort();
    /// assert_eq!(pairs, [(1, 10), (2, 20), (3, 30)]);
    /// ```
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

    #[inline(always)]
    fn keys(&self) -> &[K] {
        // SAFETY: The allocation starts with `capacity` initialized keys.
        unsafe {
            core::slice::from_raw_parts(self.storage.ptr().cast::<K>(), self.capacity())
        }
    }

    #[inline(always)]
    fn values_ptr(&self) -> *mut MaybeUninit<V> {
        let offset = value_array_offset(self.capacity() * size_of::<K>(), align_of::<V>());
        // SAFETY: `TableLayout` places the value array at this offset, inside
        // (or, for zero-sized values, one past the end of) the allocation.
        unsafe { self.storage.ptr().add(offset).cast() }
    }

    #[inline(always)]
    fn values(&self) -> &[MaybeUninit<V>] {
        // SAFETY: The value array holds `capacity` possibly-uninit slots.
        unsafe { core::slice::from_raw_parts(self.values_ptr(), self.capacity()) }
    }

    #[inline(always)]
    fn slots_mut(&mut self) -> (&mut [K], &mut [MaybeUninit<V>], &K) {
        let capacity = self.capacity();
        let keys = self.storage.ptr().cast::<K>();
        let values = self.values_ptr();

        // SAFETY: The key and value arrays are disjoint regions of an
        // allocation that `&mut self` owns exclusively; the empty key lives in
        // the table struct, outside that allocation.
        unsafe {
            (
                core::slice::from_raw_parts_mut(keys, capacity),
                core::slice::from_raw_parts_mut(values, capacity),
                &self.empty_key,
            )
        }
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// Creates an empty table with 128 slots that hashes keys with
    /// `hash_builder`.
    ///
    /// `empty_key` marks vacant slots and can never be inserted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::BuildIdentityHasher;
    /// use cacheline_map::HashTable;
    ///
    /// let table: HashTable<u16, u64, _> = HashTable::with_hasher(0, BuildIdentityHasher);
    /// assert_eq!(table.capacity(), 128);
    /// assert_eq!(table.empty_key(), &0);
    /// ```
    pub fn with_hasher(empty_key: K, hash_builder: S) -> Self {
        Self::with_power(INITIAL_CAPACITY_POWER, empty_key, hash_builder)
    }

    /// Creates an empty table with at least `capacity` slots (rounded up to a
    /// power of two, and never fewer than 128) that hashes keys with
    /// `hash_builder`.
    pub fn with_capacity_and_hasher(capacity: usize, empty_key: K, hash_builder: S) -> Self {
        let power = capacity
            .checked_next_power_of_two()
            .expect("allocation size overflow")
            .trailing_zeros() as usize;
        Self::with_power(power.max(INITIAL_CAPACITY_POWER), empty_key, hash_builder)
    }

    fn with_power(power: usize, empty_key: K, hash_builder: S) -> Self {
        let () = Self::KEYS_TILE_CACHELINE;

        let storage = Self::allocate(power, &empty_key);
        Self {
            storage,
            empty_key,
            hash_builder,
            _phantom: PhantomData,
        }
    }

    /// Allocates `2^power` slots and fills every key slot with `empty_key`.
    fn allocate(power: usize, empty_key: &K) -> Storage {
        let capacity = 1usize
            .checked_shl(power as u32)
            .expect("allocation size overflow");
        let layout = TableLayout::new::<K, V>(capacity);

        // SAFETY: The layout has a non-zero size because keys are never
        // zero-sized. Allocation failure is handled. Every key slot written is
        // inside the key array.
        unsafe {
            let raw = alloc::alloc::alloc(layout.layout());
            if raw.is_null() {
                handle_alloc_error(layout.layout());
            }

            let keys = raw.cast::<K>();
            for index in 0..capacity {
                keys.add(index).write(empty_key.clone());
            }

            Storage::new(raw, power)
        }
    }

    /// Index of the cacheline-aligned slot where `key`'s probe window begins.
    #[inline(always)]
    fn probe_start(&self, key: &K) -> usize {
        let mask = self.capacity() as u64 - 1;
        let slot = (secondary_hash(self.hash_builder.hash_one(key)) & mask) as usize;
        slot & !(Self::KEYS_PER_CACHELINE - 1)
    }

    #[inline(always)]
    fn probe_window(&self, key: &K) -> Range<usize> {
        let start = self.probe_start(key);
        start..(start + Self::PROBE_LIMIT).min(self.capacity())
    }

    #[inline]
    fn probe(&self, key: &K) -> Probe {
        let window = self.probe_window(key);
        let keys = self.keys();
        prefetch(
            keys.as_ptr()
                .wrapping_add(window.start + Self::KEYS_PER_CACHELINE),
        );

        for (offset, slot) in keys[window.clone()].iter().enumerate() {
            if *slot == self.empty_key {
                return Probe::Vacant(window.start + offset);
            }
            if slot == key {
                return Probe::Present(window.start + offset);
            }
        }

        Probe::Exhausted
    }

    #[inline]
    fn find_index(&self, key: &K) -> Option<usize> {
        match self.probe(key) {
            Probe::Present(index) => Some(index),
            Probe::Vacant(_) | Probe::Exhausted => None,
        }
    }

    /// Returns a reference to the value stored for `key`.
    ///
    /// The reference points into the table's allocation and cannot outlive
    /// the next mutation of the table.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let mut table = HashTable::new(u64::MAX);
    /// table.insert(1, 'a');
    ///
    /// assert_eq!(table.get(&1), Some(&'a'));
    /// assert_eq!(table.get(&2), None);
    /// ```
    #[inline]
    pub fn get(&self, key: &K) -> Option<&V> {
        let index = self.find_index(key)?;
        // SAFETY: `find_index` only returns occupied slots, whose values are
        // initialized.
        Some(unsafe { self.values().get_unchecked(index).assume_init_ref() })
    }

    /// Returns a mutable reference to the value stored for `key`.
    #[inline]
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find_index(key)?;
        let (_, values, _) = self.slots_mut();
        // SAFETY: `find_index` only returns occupied slots, whose values are
        // initialized.
        Some(unsafe { values.get_unchecked_mut(index).assume_init_mut() })
    }

    /// Returns `true` if the table holds an entry for `key`.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.find_index(key).is_some()
    }

    /// Inserts `value` under `key`.
    ///
    /// Returns `true` if the entry was inserted. Returns `false`, leaving the
    /// table untouched and dropping `value`, if `key` is already present or
    /// is the empty key. The table doubles as often as needed to fit the key
    /// within its probe window.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let mut table = HashTable::new(0u64);
    /// assert!(table.insert(5, 50));
    /// assert!(!table.insert(5, 51));
    /// assert_eq!(table.get(&5), Some(&50));
    /// assert_eq!(table.len(), 1);
    /// ```
    #[inline]
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.emplace(key, || value)
    }

    /// Inserts the value produced by `make` under `key`.
    ///
    /// `make` runs only if the key is actually inserted. Returns `false` if
    /// `key` is already present or is the empty key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let mut table: HashTable<u32, Vec<u8>> = HashTable::new(u32::MAX);
    /// assert!(table.emplace(1, || vec![0; 16]));
    /// assert!(!table.emplace(1, || unreachable!()));
    /// ```
    pub fn emplace(&mut self, key: K, make: impl FnOnce() -> V) -> bool {
        if key == self.empty_key {
            return false;
        }

        loop {
            match self.probe(&key) {
                Probe::Present(_) => return false,
                Probe::Vacant(index) => {
                    let value = make();
                    let (keys, values, _) = self.slots_mut();
                    keys[index] = key;
                    values[index].write(value);
                    return true;
                }
                Probe::Exhausted => self.double_size(),
            }
        }
    }

    /// Doubles the capacity and reinserts every entry.
    #[cold]
    #[inline(never)]
    fn double_size(&mut self) {
        let old_power = self.storage.num();
        let old_capacity = 1usize << old_power;
        let old_layout = TableLayout::new::<K, V>(old_capacity);
        let old = self.storage;

        self.storage = Self::allocate(old_power + 1, &self.empty_key);
        tracing::debug!(
            from = old_capacity,
            to = self.capacity(),
            "doubling hash table capacity"
        );

        let old_keys = old.ptr().cast::<K>();
        // SAFETY: The old value array sits at `values_offset` in the old
        // allocation.
        let old_values = unsafe {
            old.ptr()
                .add(old_layout.values_offset())
                .cast::<MaybeUninit<V>>()
        };

        // Ownership note: every old key is moved out exactly once, either into
        // the new table or dropped if it is the empty key. Values move with
        // their keys. The old allocation is then freed without running any
        // destructors.
        for index in 0..old_capacity {
            // SAFETY: All old key slots are initialized, and a value is
            // initialized wherever its key is not the empty key.
            unsafe {
                let key = old_keys.add(index).read();
                if key == self.empty_key {
                    continue;
                }
                let value = old_values.add(index).read().assume_init();
                let inserted = self.emplace(key, || value);
                debug_assert!(inserted);
            }
        }

        // SAFETY: The old allocation was made with `old_layout` and nothing
        // in it is live anymore.
        unsafe {
            alloc::alloc::dealloc(old.ptr(), old_layout.layout());
        }
    }

    /// Removes the entry for `key`, returning its value.
    ///
    /// Entries later in the freed slot's probe window may be moved back to
    /// keep every key reachable, so references obtained before the call are
    /// invalidated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let mut table = HashTable::new(u64::MAX);
    /// table.insert(1, "one");
    /// table.insert(2, "two");
    ///
    /// assert_eq!(table.remove(&1), Some("one"));
    /// assert_eq!(table.remove(&1), None);
    /// assert_eq!(table.get(&2), Some(&"two"));
    /// ```
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.find_index(key)?;
        let (keys, values, empty_key) = self.slots_mut();

        keys[index] = empty_key.clone();
        // SAFETY: The slot was occupied; it is now marked vacant, so the value
        // is read out exactly once.
        let value = unsafe { values[index].assume_init_read() };

        self.reshuffle(index);
        Some(value)
    }

    /// Refills the vacant slot `hole` from later in its probe window.
    ///
    /// An entry may only sit at index `i` if every slot between its probe
    /// start and `i` is occupied, because lookups stop at the first vacant
    /// slot. Emptying `hole` breaks that for every later entry whose window
    /// starts at or before `hole`. The first such entry moves into the hole,
    /// which reopens the problem at its old index, so the scan continues from
    /// there. Scanning stops at a vacant slot or once no entry could reach
    /// back to the hole.
    fn reshuffle(&mut self, mut hole: usize) {
        let capacity = self.capacity();
        let mut index = hole + 1;

        while index < capacity && index - hole < Self::PROBE_LIMIT {
            let key = &self.keys()[index];
            if *key == self.empty_key {
                break;
            }

            if self.probe_start(key) <= hole {
                let (keys, values, _) = self.slots_mut();
                keys.swap(hole, index);
                values.swap(hole, index);
                hole = index;
            }
            index += 1;
        }
    }

    /// Removes every entry, keeping the current capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::HashTable;
    ///
    /// let mut table = HashTable::new(u64::MAX);
    /// for i in 0..1000 {
    ///     table.insert(i, i);
    /// }
    /// let capacity = table.capacity();
    ///
    /// table.clear();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), capacity);
    /// assert_eq!(table.get(&10), None);
    /// ```
    pub fn clear(&mut self) {
        let (keys, values, empty_key) = self.slots_mut();
        for (key, value) in keys.iter_mut().zip(values.iter_mut()) {
            if key != empty_key {
                // SAFETY: The slot is occupied, so its value is initialized.
                // Marking the key vacant below prevents a second drop.
                unsafe { value.assume_init_drop() };
                *key = empty_key.clone();
            }
        }
    }

    /// Computes how far each entry sits from the start of its probe window.
    ///
    /// Index `d` of the result counts the entries stored `d` slots past their
    /// probe start; the result has [`PROBE_LIMIT`](Self::PROBE_LIMIT) bins.
    #[cfg(any(test, feature = "stats"))]
    pub fn probe_histogram(&self) -> ProbeHistogram {
        let mut bins = alloc::vec![0usize; Self::PROBE_LIMIT];
        for (index, key) in self.keys().iter().enumerate() {
            if *key != self.empty_key {
                bins[index - self.probe_start(key)] += 1;
            }
        }
        ProbeHistogram { bins }
    }

    /// Summarizes occupancy and memory use.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let populated = self.len();
        let capacity = self.capacity();
        let total_bytes = TableLayout::new::<K, V>(capacity).size();
        let used_bytes = populated * (size_of::<K>() + size_of::<V>());
        let max_probe_distance = self
            .probe_histogram()
            .bins
            .iter()
            .rposition(|&count| count != 0)
            .unwrap_or(0);

        DebugStats {
            populated,
            capacity,
            load_factor: populated as f64 / capacity as f64,
            total_bytes,
            wasted_bytes: total_bytes - used_bytes,
            max_probe_distance,
        }
    }
}

/// Distribution of entries by distance from their probe start.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHistogram {
    /// `bins[d]` is the number of entries stored `d` slots past their probe
    /// start.
    pub bins: alloc::vec::Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl ProbeHistogram {
    /// Total number of entries counted.
    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Pretty-print the histogram.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        let total = self.total().max(1);
        println!("=== Probe Distance Histogram ===");
        for (distance, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            println!(
                "{distance:>3}: {count:>10} ({:>6.2}%)",
                count as f64 / total as f64 * 100.0
            );
        }
    }
}

/// Occupancy and memory statistics for a [`HashTable`].
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries currently in the table
    pub populated: usize,
    /// Number of slots
    pub capacity: usize,
    /// Load factor (populated / capacity)
    pub load_factor: f64,
    /// Total bytes of the backing allocation
    pub total_bytes: usize,
    /// Bytes not holding a live key or value
    pub wasted_bytes: usize,
    /// Largest distance of any entry from its probe start
    pub max_probe_distance: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Debug Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!("Max probe distance: {}", self.max_probe_distance);
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes wasted ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// An iterator over the entries of a [`HashTable`] in slot order.
///
/// Created by [`HashTable::iter`] and the `iter` methods of the other tables.
pub struct Iter<'a, K, V> {
    keys: &'a [K],
    values: &'a [MaybeUninit<V>],
    empty_key: &'a K,
    index: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    /// `values[i]` must be initialized wherever `keys[i] != *empty_key`.
    pub(crate) fn new(keys: &'a [K], values: &'a [MaybeUninit<V>], empty_key: &'a K) -> Self {
        Self {
            keys,
            values,
            empty_key,
            index: 0,
        }
    }
}

impl<'a, K: Eq, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.keys.len() {
            let index = self.index;
            self.index += 1;

            let key = &self.keys[index];
            if key != self.empty_key {
                // SAFETY: The slot is occupied, so its value is initialized.
                let value = unsafe { self.values[index].assume_init_ref() };
                return Some((key, value));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.keys.len() - self.index))
    }
}

impl<'a, K: Eq, V, S> IntoIterator for &'a HashTable<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::cell::Cell;

    use rand::Rng;
    use rand::SeedableRng;
    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use rand::rngs::SmallRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::hasher::BuildIdentityHasher;

    #[derive(Clone)]
    struct SipHashBuilder {
        k0: u64,
        k1: u64,
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap_or(0),
                k1: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    const EMPTY: u64 = u64::MAX;

    fn identity_table<V>() -> HashTable<u64, V, BuildIdentityHasher> {
        HashTable::with_hasher(EMPTY, BuildIdentityHasher)
    }

    /// Checks that every entry is inside its probe window with no vacant slot
    /// between the window start and the entry.
    fn assert_reachable<K, V, S>(table: &HashTable<K, V, S>)
    where
        K: Eq + Hash + Clone + Debug,
        S: BuildHasher,
    {
        let keys = table.keys();
        for (index, key) in keys.iter().enumerate() {
            if *key == table.empty_key {
                continue;
            }
            let start = table.probe_start(key);
            assert!(
                start <= index && index < start + HashTable::<K, V, S>::PROBE_LIMIT,
                "{key:?} at {index} is outside the window starting at {start}"
            );
            assert!(
                keys[start..index].iter().all(|k| *k != table.empty_key),
                "{key:?} at {index} is behind a vacant slot"
            );
        }
    }

    /// Finds `count` keys whose probe window starts at `start`.
    fn keys_starting_at<V>(
        table: &HashTable<u64, V, BuildIdentityHasher>,
        start: usize,
        count: usize,
    ) -> Vec<u64> {
        (1..)
            .filter(|key| table.probe_start(key) == start)
            .take(count)
            .collect()
    }

    #[test]
    fn table_is_two_words() {
        assert_eq!(
            size_of::<HashTable<u64, u64, BuildIdentityHasher>>(),
            2 * size_of::<usize>()
        );
        assert_eq!(HashTable::<u64, u64, BuildIdentityHasher>::PROBE_LIMIT, 16);
        assert_eq!(HashTable::<u8, u64, BuildIdentityHasher>::PROBE_LIMIT, 128);
    }

    #[test]
    fn insert_and_get() {
        let mut table: HashTable<u64, String, _> =
            HashTable::with_hasher(EMPTY, SipHashBuilder::default());
        for k in 0..32u64 {
            assert!(table.insert(k, k.to_string()), "{table:?}");
            assert_eq!(table.get(&k), Some(&k.to_string()));
        }
        assert_eq!(table.len(), 32);
        for k in 0..32u64 {
            assert_eq!(table.get(&k), Some(&k.to_string()), "{table:?}");
        }
        assert!(table.get(&999).is_none());
        assert!(!table.contains_key(&999));
    }

    #[test]
    fn duplicate_insert_is_a_no_op() {
        let mut table = identity_table();
        assert!(table.insert(42, 7));
        assert_eq!(table.len(), 1);

        assert!(!table.insert(42, 11));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&42), Some(&7));
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut table = identity_table();
        table.insert(1, 1);

        assert!(!table.insert(EMPTY, 2));
        assert!(!table.emplace(EMPTY, || panic!("constructed a value for the empty key")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.capacity(), 128);
        assert!(table.get(&EMPTY).is_none());
        assert!(table.remove(&EMPTY).is_none());
    }

    #[test]
    fn emplace_constructs_only_on_insert() {
        let mut table = identity_table();
        let calls = Cell::new(0);

        assert!(table.emplace(3, || {
            calls.set(calls.get() + 1);
            alloc::vec![3u8; 4]
        }));
        assert!(!table.emplace(3, || {
            calls.set(calls.get() + 1);
            Vec::new()
        }));
        assert_eq!(calls.get(), 1);
        assert_eq!(table.get(&3), Some(&alloc::vec![3u8; 4]));
    }

    #[test]
    fn get_mut_modifies_in_place() {
        let mut table = identity_table();
        table.insert(9, String::from("nine"));

        table.get_mut(&9).unwrap().push('!');
        assert_eq!(table.get(&9).map(String::as_str), Some("nine!"));
        assert!(table.get_mut(&10).is_none());
    }

    #[test]
    fn remove_then_reinsert_in_same_window() {
        let mut table = identity_table();
        let keys = keys_starting_at(&table, 0, 4);
        let (a, b, c, d) = (keys[0], keys[1], keys[2], keys[3]);

        table.insert(a, 1);
        table.insert(b, 2);
        table.insert(c, 3);
        assert_eq!(table.remove(&b), Some(2));

        assert!(table.get(&b).is_none());
        assert_eq!(table.get(&a), Some(&1));
        assert_eq!(table.get(&c), Some(&3));
        assert!(table.insert(d, 4));
        assert_eq!(table.get(&d), Some(&4));
        assert_reachable(&table);
    }

    #[test]
    fn removal_pulls_later_entries_back() {
        let mut table = identity_table();
        let keys = keys_starting_at(&table, 0, 3);
        for (value, key) in keys.iter().enumerate() {
            table.insert(*key, value);
        }
        assert_eq!(table.keys()[..3], keys[..]);

        table.remove(&keys[0]);
        // Without the repair the scan would stop at slot 0 and miss both.
        assert_eq!(table.keys()[0], keys[1]);
        assert_eq!(table.keys()[1], keys[2]);
        assert_eq!(table.keys()[2], EMPTY);
        assert_eq!(table.get(&keys[1]), Some(&1));
        assert_eq!(table.get(&keys[2]), Some(&2));
    }

    #[test]
    fn removal_repairs_across_cacheline_boundaries() {
        let mut table = identity_table();
        let line = HashTable::<u64, u64, BuildIdentityHasher>::KEYS_PER_CACHELINE;

        let first = keys_starting_at(&table, 0, line + 2);
        let second = keys_starting_at(&table, line, 1);
        for key in &first {
            table.insert(*key, *key);
        }
        table.insert(second[0], second[0]);
        assert_eq!(table.keys()[line + 2], second[0]);

        table.remove(&first[line + 1]);
        assert_reachable(&table);
        // The freed slot is reachable from the second window, which starts
        // before it, so its entry is pulled back.
        assert_eq!(table.keys()[line + 1], second[0]);

        table.remove(&first[0]);
        assert_reachable(&table);
        for key in first[1..=line].iter().chain(&second) {
            assert_eq!(table.get(key), Some(key));
        }
    }

    #[test]
    fn full_window_triggers_growth() {
        let mut table = identity_table();
        let limit = HashTable::<u64, u64, BuildIdentityHasher>::PROBE_LIMIT;

        let keys = keys_starting_at(&table, 0, limit + 1);
        for key in &keys[..limit] {
            assert!(table.insert(*key, *key * 2));
        }
        assert_eq!(table.capacity(), 128);

        assert!(table.insert(keys[limit], keys[limit] * 2));
        assert!(table.capacity() >= 256);
        for key in &keys {
            assert_eq!(table.get(key), Some(&(key * 2)));
        }
        assert_reachable(&table);
    }

    #[test]
    fn dense_ids_fill_the_table_without_growing() {
        let mut table = identity_table();
        for id in 0..128 {
            assert!(table.insert(id, id));
        }
        assert_eq!(table.capacity(), 128);
        assert_eq!(table.len(), 128);
        assert_eq!(table.debug_stats().load_factor, 1.0);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn growth_preserves_membership() {
        let mut table = HashTable::with_hasher(EMPTY, SipHashBuilder::default());
        for k in 0..10_000u64 {
            assert!(table.insert(k, k * 3));
        }
        assert!(table.capacity() >= 10_000);
        assert_eq!(table.len(), 10_000);
        for k in 0..10_000u64 {
            assert_eq!(table.get(&k), Some(&(k * 3)));
        }
        assert_reachable(&table);
        assert!(table.debug_stats().max_probe_distance < table.probe_histogram().bins.len());
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn random_operations_keep_every_key_reachable() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let mut table = identity_table();
        let mut model = alloc::collections::BTreeMap::new();

        for step in 0..20_000 {
            let key = rng.random_range(0..2_000u64);
            if rng.random_bool(0.6) {
                let inserted = table.insert(key, step);
                assert_eq!(inserted, !model.contains_key(&key));
                model.entry(key).or_insert(step);
            } else {
                assert_eq!(table.remove(&key), model.remove(&key));
            }

            if step % 1_000 == 0 {
                assert_reachable(&table);
            }
        }

        assert_reachable(&table);
        assert_eq!(table.len(), model.len());
        for (key, value) in &model {
            assert_eq!(table.get(key), Some(value));
        }
    }

    #[test]
    fn small_keys_use_wider_windows() {
        let mut table: HashTable<u16, u32, _> = HashTable::with_hasher(0, BuildIdentityHasher);
        for id in 1..=2_000u16 {
            assert!(table.insert(id, id as u32));
        }
        for id in (1..=2_000u16).step_by(3) {
            assert_eq!(table.remove(&id), Some(id as u32));
        }
        assert_reachable(&table);
        for id in 1..=2_000u16 {
            let expected = if (id - 1) % 3 == 0 { None } else { Some(id as u32) };
            assert_eq!(table.get(&id).copied(), expected);
        }
    }

    #[test]
    fn clear_empties_and_keeps_capacity() {
        let mut table = identity_table();
        for k in 0..500 {
            table.insert(k, k.to_string());
        }
        let capacity = table.capacity();

        table.clear();
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
        assert_eq!(table.capacity(), capacity);
        for k in 0..500 {
            assert!(table.get(&k).is_none());
        }

        table.clear();
        assert!(table.is_empty());
        assert!(table.insert(1, "again".to_string()));
    }

    #[test]
    fn iteration_visits_each_entry_once() {
        let mut table = identity_table();
        for k in 0..300 {
            table.insert(k, k + 1);
        }

        let mut seen: Vec<_> = table.iter().map(|(&k, &v)| (k, v)).collect();
        seen.sort();
        assert_eq!(seen, (0..300).map(|k| (k, k + 1)).collect::<Vec<_>>());

        table.for_each_value(|v| *v *= 2);
        table.for_each(|k, v| assert_eq!(*v, (k + 1) * 2));
        assert_eq!((&table).into_iter().count(), 300);
    }

    #[test]
    fn clone_is_independent() {
        let mut table = HashTable::with_hasher(EMPTY, SipHashBuilder::default());
        for k in 0..200u64 {
            table.insert(k, k.to_string());
        }

        let mut copy = table.clone();
        assert_eq!(copy.capacity(), table.capacity());
        assert_eq!(copy.len(), 200);

        copy.remove(&5);
        copy.get_mut(&6).unwrap().push('x');
        assert_eq!(table.get(&5), Some(&"5".to_string()));
        assert_eq!(table.get(&6), Some(&"6".to_string()));
        assert_eq!(copy.get(&6), Some(&"6x".to_string()));
    }

    #[derive(Clone)]
    struct Tracked {
        live: Rc<Cell<isize>>,
    }

    impl Tracked {
        fn new(live: &Rc<Cell<isize>>) -> Self {
            live.set(live.get() + 1);
            Self { live: live.clone() }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.live.set(self.live.get() - 1);
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn every_value_and_key_is_dropped_once() {
        let live = Rc::new(Cell::new(0));
        let sentinel = Rc::new(u64::MAX);
        {
            let mut table = HashTable::with_hasher(sentinel.clone(), SipHashBuilder::default());
            for k in 0..1_000u64 {
                table.insert(Rc::new(k), Tracked::new(&live));
            }
            assert_eq!(live.get(), 1_000);

            for k in 0..100u64 {
                drop(table.remove(&Rc::new(k)));
            }
            assert_eq!(live.get(), 900);

            assert!(!table.insert(Rc::new(500), Tracked::new(&live)));
            assert_eq!(live.get(), 900);

            table.clear();
            assert_eq!(live.get(), 0);

            for k in 0..50u64 {
                table.insert(Rc::new(k), Tracked::new(&live));
            }
        }
        assert_eq!(live.get(), 0);
        assert_eq!(Rc::strong_count(&sentinel), 1);
    }

    #[test]
    fn probe_histogram_counts_every_entry() {
        let mut table = identity_table();
        let keys = keys_starting_at(&table, 64, 10);
        for key in &keys {
            table.insert(*key, ());
        }

        let histogram = table.probe_histogram();
        assert_eq!(histogram.total(), 10);
        assert_eq!(histogram.bins[..10], [1; 10]);
        assert_eq!(table.debug_stats().max_probe_distance, 9);
    }

    #[test]
    fn debug_lists_entries() {
        let mut table = identity_table();
        table.insert(1, "x");
        assert_eq!(alloc::format!("{table:?}"), r#"{1: "x"}"#);
    }
}
