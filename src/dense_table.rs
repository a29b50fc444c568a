use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;

use crate::hash_table::Iter;
use crate::hasher::DefaultHashBuilder;
use crate::static_table::StaticTable;

/// A hash table that never holds a vacant slot it doesn't need.
///
/// Backed by a [`StaticTable`] whose capacity is kept at exactly
/// `max(len, 1)`: every insertion of a new key reallocates one slot larger,
/// every removal one slot smaller. Memory use is minimal at the cost of
/// O(n) insertion and removal, and lookups inherit the full-table scan of
/// `StaticTable`. Suited to small, rarely modified maps.
///
/// ## Example
///
/// ```rust
/// use cacheline_map::DenseTable;
///
/// let mut table = DenseTable::from_pairs(u32::MAX, [(1, "one"), (2, "two")]);
/// assert_eq!(table.capacity(), 2);
///
/// table.insert(3, "three");
/// assert_eq!(table.capacity(), 3);
///
/// table.remove(&1);
/// assert_eq!(table.capacity(), 2);
/// assert_eq!(table.get(&3), Some(&"three"));
/// ```
pub struct DenseTable<K, V, S = DefaultHashBuilder>
where
    K: Eq,
{
    table: StaticTable<K, V, S>,
}

impl<K, V, S> Debug for DenseTable<K, V, S>
where
    K: Eq + Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(&self.table, f)
    }
}

impl<K, V, S> Clone for DenseTable<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<K, V> DenseTable<K, V, DefaultHashBuilder>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty table with the default hasher.
    pub fn new(empty_key: K) -> Self {
        Self::with_hasher(empty_key, DefaultHashBuilder::default())
    }

    /// Creates a table holding `pairs`, sized to fit them exactly.
    ///
    /// Later duplicates of a key are dropped, as are pairs keyed by
    /// `empty_key`.
    pub fn from_pairs(empty_key: K, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::from_pairs_with_hasher(empty_key, pairs, DefaultHashBuilder::default())
    }
}

impl<K: Eq, V, S> DenseTable<K, V, S> {
    /// Returns the number of slots: the number of entries, or one when empty.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the key that marks vacant slots.
    pub fn empty_key(&self) -> &K {
        self.table.empty_key()
    }

    /// Returns a reference to the table's hasher builder.
    pub fn hasher(&self) -> &S {
        self.table.hasher()
    }

    /// Returns an iterator over the entries in slot order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        self.table.iter()
    }

    /// Calls `f` with every entry in slot order.
    pub fn for_each(&mut self, f: impl FnMut(&K, &mut V)) {
        self.table.for_each(f);
    }

    /// Calls `f` with every value in slot order.
    pub fn for_each_value(&mut self, f: impl FnMut(&mut V)) {
        self.table.for_each_value(f);
    }
}

impl<K, V, S> DenseTable<K, V, S>
where
    K: Eq + Hash + Clone,
    S: BuildHasher,
{
    /// Creates an empty table (one vacant slot) that hashes keys with
    /// `hash_builder`.
    pub fn with_hasher(empty_key: K, hash_builder: S) -> Self {
        Self {
            table: StaticTable::with_hasher(1, empty_key, hash_builder),
        }
    }

    /// Creates a table holding `pairs` that hashes keys with `hash_builder`.
    pub fn from_pairs_with_hasher(
        empty_key: K,
        pairs: impl IntoIterator<Item = (K, V)>,
        hash_builder: S,
    ) -> Self {
        let pairs = pairs.into_iter();
        let mut table = StaticTable::with_hasher(pairs.size_hint().0.max(1), empty_key, hash_builder);

        for (key, value) in pairs {
            if let Err((key, value)) = table.insert(key, value) {
                table.resize(table.capacity() + 1);
                let inserted = table.insert(key, value);
                debug_assert!(matches!(inserted, Ok(true)));
            }
        }

        let mut dense = Self { table };
        dense.shrink_to_fit();
        dense
    }

    fn resize(&mut self, capacity: usize) {
        tracing::debug!(
            from = self.table.capacity(),
            to = capacity,
            "resizing dense table"
        );
        self.table.resize(capacity);
    }

    fn shrink_to_fit(&mut self) {
        let capacity = self.table.len().max(1);
        if capacity != self.table.capacity() {
            self.resize(capacity);
        }
    }

    /// Returns a reference to the value stored for `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.table.get(key)
    }

    /// Returns a mutable reference to the value stored for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.table.get_mut(key)
    }

    /// Returns `true` if the table holds an entry for `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.table.contains_key(key)
    }

    /// Inserts `value` under `key`, growing the table by one slot if needed.
    ///
    /// Returns `false` if `key` is already present or is the empty key.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        self.emplace(key, || value)
    }

    /// Inserts the value produced by `make` under `key`, growing the table by
    /// one slot if needed. `make` runs only if the key is inserted.
    pub fn emplace(&mut self, key: K, make: impl FnOnce() -> V) -> bool {
        if key == *self.table.empty_key() || self.table.contains_key(&key) {
            return false;
        }
        if self.table.is_full() {
            self.resize(self.table.capacity() + 1);
        }
        matches!(self.table.emplace(key, make), Ok(true))
    }

    /// Removes the entry for `key`, shrinking the table by one slot.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.table.remove(key)?;
        self.shrink_to_fit();
        Some(value)
    }

    /// Removes every entry and shrinks the table to a single slot.
    pub fn clear(&mut self) {
        self.table.clear();
        self.shrink_to_fit();
    }
}
