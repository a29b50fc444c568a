use core::fmt::Debug;

use crate::layout::CACHELINE;
use crate::packed::AlignedPtr;
use crate::packed::CanonicalPtr;

/// Bits of the length kept in the pointer's alignment bits.
const LOW_LEN_BITS: u32 = CACHELINE.trailing_zeros();
const LOW_LEN_MASK: usize = (1 << LOW_LEN_BITS) - 1;

/// A pointer-plus-length handle to cacheline-aligned memory that fits in a
/// single machine word.
///
/// The length is split across both packing schemes: its low six bits sit in
/// the alignment bits of the 64-byte-aligned pointer and its next sixteen bits
/// sit in the spare canonical-address bits. That caps the length at
/// [`MAX_LEN`](Self::MAX_LEN) elements.
///
/// A `BoundedRef` is only a handle. Copying it copies the word; it neither
/// owns nor borrows the memory it describes, and whoever allocated that
/// memory stays responsible for freeing it.
pub struct BoundedRef<T> {
    word: CanonicalPtr<T>,
}

impl<T> BoundedRef<T> {
    /// Largest length a `BoundedRef` can describe.
    pub const MAX_LEN: usize = (1 << (LOW_LEN_BITS + u16::BITS)) - 1;

    /// Creates a handle to `len` elements starting at `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not 64-byte aligned, is not a canonical address, or
    /// if `len` exceeds [`MAX_LEN`](Self::MAX_LEN).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::BoundedRef;
    ///
    /// #[repr(align(64))]
    /// struct Block([u32; 32]);
    ///
    /// let mut block = Block([7; 32]);
    /// let handle = BoundedRef::new(block.0.as_mut_ptr(), 32);
    /// assert_eq!(handle.len(), 32);
    /// assert_eq!(handle.byte_size(), 128);
    ///
    /// unsafe { handle.zero() };
    /// assert!(block.0.iter().all(|&x| x == 0));
    /// ```
    pub fn new(ptr: *mut T, len: usize) -> Self {
        assert!(
            len <= Self::MAX_LEN,
            "length {len} exceeds the maximum of {}",
            Self::MAX_LEN
        );
        let low: AlignedPtr<T, LOW_LEN_BITS> = AlignedPtr::new(ptr, len & LOW_LEN_MASK);
        let word = CanonicalPtr::new(low.into_tagged(), (len >> LOW_LEN_BITS) as u16);
        Self { word }
    }

    #[inline(always)]
    fn low(&self) -> AlignedPtr<T, LOW_LEN_BITS> {
        AlignedPtr::from_tagged(self.word.ptr())
    }

    /// Returns the start of the referenced memory.
    #[inline]
    pub fn ptr(&self) -> *mut T {
        self.low().ptr()
    }

    /// Returns the number of elements referenced.
    #[inline]
    pub fn len(&self) -> usize {
        self.low().num() | ((self.word.num() as usize) << LOW_LEN_BITS)
    }

    /// Returns `true` if the handle references no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the size of the referenced memory in bytes.
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.len() * size_of::<T>()
    }

    /// Overwrites the referenced memory with zero bytes.
    ///
    /// # Safety
    ///
    /// The handle must describe memory that is valid for writes of
    /// [`byte_size`](Self::byte_size) bytes, and nothing else may be reading
    /// or writing it. Values previously stored there are not dropped.
    pub unsafe fn zero(&self) {
        // SAFETY: The caller guarantees the range is writable and unaliased.
        unsafe {
            core::ptr::write_bytes(self.ptr(), 0, self.len());
        }
    }

    /// Views the referenced memory as a slice.
    ///
    /// # Safety
    ///
    /// The memory must hold `len()` initialized values of `T`, stay live for
    /// `'a`, and must not be mutated while the slice exists.
    pub unsafe fn as_slice<'a>(&self) -> &'a [T] {
        // SAFETY: The caller upholds the slice validity requirements.
        unsafe { core::slice::from_raw_parts(self.ptr(), self.len()) }
    }

    /// Views the referenced memory as a mutable slice.
    ///
    /// # Safety
    ///
    /// As for [`as_slice`](Self::as_slice), and additionally no other
    /// reference to the memory may exist for `'a`.
    pub unsafe fn as_mut_slice<'a>(&self) -> &'a mut [T] {
        // SAFETY: The caller upholds the unique slice validity requirements.
        unsafe { core::slice::from_raw_parts_mut(self.ptr(), self.len()) }
    }
}

impl<T> Clone for BoundedRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BoundedRef<T> {}

impl<T> PartialEq for BoundedRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr() == other.ptr() && self.len() == other.len()
    }
}

impl<T> Eq for BoundedRef<T> {}

impl<T> Debug for BoundedRef<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoundedRef")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}
