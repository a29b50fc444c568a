//! Byte layout of a table allocation: `capacity` keys followed by `capacity`
//! values, the value array starting at the first offset that satisfies the
//! value type's alignment.
//!
//! These are pure functions of the capacity and the key/value types so they
//! can be shared by every table type and checked in isolation.

use core::alloc::Layout;

/// Size and alignment of a cacheline, in bytes.
pub const CACHELINE: usize = 64;

/// Rounds `key_bytes` up to the next multiple of `value_align`, giving the
/// offset at which the value array starts.
///
/// `value_align` must be a power of two.
#[inline]
pub const fn value_array_offset(key_bytes: usize, value_align: usize) -> usize {
    debug_assert!(value_align.is_power_of_two());
    (key_bytes + value_align - 1) & !(value_align - 1)
}

/// Number of bytes from the start of the allocation to the first value:
/// the key array plus the padding needed to align `V`.
#[inline]
pub fn key_array_len_in_bytes<K, V>(capacity: usize) -> usize {
    TableLayout::new::<K, V>(capacity).values_offset
}

/// Total size in bytes of an allocation holding `capacity` keys and values.
#[inline]
pub fn overall_len_in_bytes<K, V>(capacity: usize) -> usize {
    TableLayout::new::<K, V>(capacity).layout.size()
}

/// The allocation layout for a key array followed by a value array.
///
/// The whole allocation is aligned to a [`CACHELINE`], so the key array
/// starts on a cacheline boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    layout: Layout,
    values_offset: usize,
}

impl TableLayout {
    /// Computes the layout for `capacity` slots of `K` keys and `V` values.
    ///
    /// # Panics
    ///
    /// Panics if the total size overflows `isize::MAX`.
    pub fn new<K, V>(capacity: usize) -> Self {
        let keys_bytes = size_of::<K>()
            .checked_mul(capacity)
            .expect("allocation size overflow");
        let values_offset = value_array_offset(keys_bytes, align_of::<V>());
        let size = size_of::<V>()
            .checked_mul(capacity)
            .and_then(|values_bytes| values_offset.checked_add(values_bytes))
            .expect("allocation size overflow");
        let align = CACHELINE.max(align_of::<K>()).max(align_of::<V>());

        let layout = Layout::from_size_align(size, align)
            .expect("allocation size overflow")
            .pad_to_align();

        TableLayout {
            layout,
            values_offset,
        }
    }

    /// The layout to allocate and deallocate with.
    #[inline(always)]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Byte offset of the value array.
    #[inline(always)]
    pub fn values_offset(&self) -> usize {
        self.values_offset
    }

    /// Total allocation size in bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    #[repr(align(32))]
    struct Wide([u8; 32]);

    #[test]
    fn offset_rounds_up_to_alignment() {
        assert_eq!(value_array_offset(0, 8), 0);
        assert_eq!(value_array_offset(3, 1), 3);
        assert_eq!(value_array_offset(3, 8), 8);
        assert_eq!(value_array_offset(8, 8), 8);
        assert_eq!(value_array_offset(130, 32), 160);
    }

    #[test]
    fn same_alignment_needs_no_padding() {
        assert_eq!(key_array_len_in_bytes::<u64, u64>(128), 1024);
        assert_eq!(overall_len_in_bytes::<u64, u64>(128), 2048);
    }

    #[test]
    fn small_keys_pad_before_wide_values() {
        // 3 one-byte keys, values need 8-byte alignment.
        let layout = TableLayout::new::<u8, u64>(3);
        assert_eq!(layout.values_offset(), 8);
        assert_eq!(layout.size(), 64);
        assert_eq!(layout.layout().align(), CACHELINE);

        let layout = TableLayout::new::<u16, Wide>(5);
        assert_eq!(layout.values_offset(), 32);
        assert_eq!(layout.size(), 32 + 5 * 32);
    }

    #[test]
    fn allocation_is_cacheline_aligned_and_padded() {
        for capacity in [1, 7, 128, 1000] {
            let layout = TableLayout::new::<u32, u16>(capacity);
            assert_eq!(layout.layout().align(), CACHELINE);
            assert_eq!(layout.size() % CACHELINE, 0);
            assert!(layout.size() >= capacity * 4 + capacity * 2);
        }
    }

    #[test]
    fn zero_sized_values_take_no_space() {
        let layout = TableLayout::new::<u64, ()>(128);
        assert_eq!(layout.values_offset(), 1024);
        assert_eq!(layout.size(), 1024);
    }

    #[test]
    #[should_panic(expected = "allocation size overflow")]
    fn overflow_is_fatal() {
        let _ = TableLayout::new::<u64, u64>(usize::MAX / 4);
    }
}
