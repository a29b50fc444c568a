use core::fmt::Debug;
use core::hash::Hash;
use core::hash::Hasher;

/// A pointer to a `2^ALIGN_BITS`-aligned `T` sharing one machine word with a
/// small unsigned integer.
///
/// The integer lives in the low `ALIGN_BITS` bits of the word, which are
/// always zero in a suitably aligned address. The stored pointer keeps its
/// provenance, so it can be dereferenced after [`ptr`](Self::ptr) strips the
/// integer back off.
///
/// Storing a pointer that is not aligned to [`ALIGN`](Self::ALIGN) bytes would
/// silently corrupt it, so [`set_ptr`](Self::set_ptr) and [`new`](Self::new)
/// treat misalignment as a fatal precondition violation.
pub struct AlignedPtr<T, const ALIGN_BITS: u32> {
    tagged: *mut T,
}

impl<T, const ALIGN_BITS: u32> AlignedPtr<T, ALIGN_BITS> {
    const VALID_WIDTH: () = assert!(
        ALIGN_BITS < usize::BITS,
        "alignment bits must leave room for an address"
    );

    /// Alignment in bytes every stored pointer must satisfy.
    pub const ALIGN: usize = 1 << ALIGN_BITS;

    /// Largest integer the container can hold.
    pub const MAX_NUM: usize = Self::ALIGN - 1;

    const MASK: usize = Self::ALIGN - 1;

    /// A null pointer paired with zero.
    #[inline]
    pub const fn null() -> Self {
        let () = Self::VALID_WIDTH;
        Self {
            tagged: core::ptr::null_mut(),
        }
    }

    /// Packs `ptr` and `num` into a single word.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not aligned to [`ALIGN`](Self::ALIGN) bytes or if
    /// `num` exceeds [`MAX_NUM`](Self::MAX_NUM).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::AlignedPtr;
    ///
    /// #[repr(align(64))]
    /// struct Line([u8; 64]);
    ///
    /// let mut line = Line([0; 64]);
    /// let raw = (&mut line as *mut Line).cast::<u8>();
    ///
    /// let packed: AlignedPtr<u8, 6> = AlignedPtr::new(raw, 42);
    /// assert_eq!(packed.ptr(), raw);
    /// assert_eq!(packed.num(), 42);
    /// assert_eq!(size_of::<AlignedPtr<u8, 6>>(), size_of::<usize>());
    /// ```
    #[inline]
    pub fn new(ptr: *mut T, num: usize) -> Self {
        let mut packed = Self::null();
        packed.set_ptr(ptr);
        packed.set_num(num);
        packed
    }

    /// Packs `ptr` and `num` without checking either precondition.
    ///
    /// # Safety
    ///
    /// `ptr` must be aligned to [`ALIGN`](Self::ALIGN) bytes and `num` must
    /// not exceed [`MAX_NUM`](Self::MAX_NUM). Otherwise the two fields bleed
    /// into each other and [`ptr`](Self::ptr) returns an address that was
    /// never stored.
    #[inline]
    pub unsafe fn new_unchecked(ptr: *mut T, num: usize) -> Self {
        let () = Self::VALID_WIDTH;
        debug_assert!(ptr.addr() & Self::MASK == 0);
        debug_assert!(num <= Self::MAX_NUM);
        Self {
            tagged: ptr.map_addr(|addr| addr | num),
        }
    }

    /// Returns the stored pointer with the integer bits cleared.
    #[inline(always)]
    pub fn ptr(self) -> *mut T {
        self.tagged.map_addr(|addr| addr & !Self::MASK)
    }

    /// Returns the stored integer.
    #[inline(always)]
    pub fn num(self) -> usize {
        self.tagged.addr() & Self::MASK
    }

    /// Replaces the pointer, keeping the integer.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not aligned to [`ALIGN`](Self::ALIGN) bytes.
    #[inline]
    pub fn set_ptr(&mut self, ptr: *mut T) {
        assert!(
            ptr.addr() & Self::MASK == 0,
            "pointer {ptr:p} is not aligned to {} bytes",
            Self::ALIGN
        );
        let num = self.num();
        self.tagged = ptr.map_addr(|addr| addr | num);
    }

    /// Replaces the integer, keeping the pointer.
    ///
    /// # Panics
    ///
    /// Panics if `num` exceeds [`MAX_NUM`](Self::MAX_NUM).
    #[inline]
    pub fn set_num(&mut self, num: usize) {
        assert!(
            num <= Self::MAX_NUM,
            "{num} does not fit in {ALIGN_BITS} alignment bits"
        );
        self.tagged = self.tagged.map_addr(|addr| (addr & !Self::MASK) | num);
    }

    /// Returns the raw word, integer bits included, as a pointer.
    ///
    /// The result must not be dereferenced; it exists so the word can be
    /// nested inside another packing scheme and recovered with
    /// [`from_tagged`](Self::from_tagged).
    #[inline(always)]
    pub fn into_tagged(self) -> *mut T {
        self.tagged
    }

    /// Rebuilds a container from a word previously produced by
    /// [`into_tagged`](Self::into_tagged).
    #[inline(always)]
    pub fn from_tagged(tagged: *mut T) -> Self {
        let () = Self::VALID_WIDTH;
        Self { tagged }
    }
}

impl<T, const ALIGN_BITS: u32> Clone for AlignedPtr<T, ALIGN_BITS> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, const ALIGN_BITS: u32> Copy for AlignedPtr<T, ALIGN_BITS> {}

impl<T, const ALIGN_BITS: u32> Default for AlignedPtr<T, ALIGN_BITS> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T, const ALIGN_BITS: u32> PartialEq for AlignedPtr<T, ALIGN_BITS> {
    fn eq(&self, other: &Self) -> bool {
        self.tagged.addr() == other.tagged.addr()
    }
}

impl<T, const ALIGN_BITS: u32> Eq for AlignedPtr<T, ALIGN_BITS> {}

impl<T, const ALIGN_BITS: u32> Hash for AlignedPtr<T, ALIGN_BITS> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tagged.addr().hash(state);
    }
}

impl<T, const ALIGN_BITS: u32> Debug for AlignedPtr<T, ALIGN_BITS> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlignedPtr")
            .field("ptr", &self.ptr())
            .field("num", &self.num())
            .finish()
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(
        target_pointer_width = "64",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))] {
        /// Number of low address bits that carry information. Bit
        /// `SIGNIFICANT_BITS - 1` is copied into every bit above it.
        pub const SIGNIFICANT_BITS: u32 = 48;

        /// Whether [`CanonicalPtr`] stores its integer inside the pointer word
        /// on this target.
        pub const CANONICAL_PACKING: bool = true;

        const ADDRESS_MASK: usize = (1 << SIGNIFICANT_BITS) - 1;
        const SPARE_BITS: u32 = usize::BITS - SIGNIFICANT_BITS;

        #[inline(always)]
        fn sign_extend(addr: usize) -> usize {
            (((addr << SPARE_BITS) as isize) >> SPARE_BITS) as usize
        }

        /// Returns `true` if `addr` is in canonical form, i.e. every bit above
        /// [`SIGNIFICANT_BITS`] mirrors the highest significant bit.
        #[inline]
        pub fn is_canonical(addr: usize) -> bool {
            sign_extend(addr) == addr
        }

        struct Repr<T> {
            tagged: *mut T,
        }

        impl<T> Repr<T> {
            const fn null() -> Self {
                Self {
                    tagged: core::ptr::null_mut(),
                }
            }

            #[inline(always)]
            fn ptr(&self) -> *mut T {
                self.tagged.map_addr(sign_extend)
            }

            #[inline(always)]
            fn num(&self) -> u16 {
                (self.tagged.addr() >> SIGNIFICANT_BITS) as u16
            }

            #[inline(always)]
            fn set_ptr(&mut self, ptr: *mut T) {
                let high = (self.num() as usize) << SIGNIFICANT_BITS;
                self.tagged = ptr.map_addr(|addr| (addr & ADDRESS_MASK) | high);
            }

            #[inline(always)]
            fn set_num(&mut self, num: u16) {
                let high = (num as usize) << SIGNIFICANT_BITS;
                self.tagged = self.tagged.map_addr(|addr| (addr & ADDRESS_MASK) | high);
            }

            #[inline(always)]
            fn word(&self) -> usize {
                self.tagged.addr()
            }
        }
    } else {
        /// Number of low address bits that carry information. Without a
        /// canonical-address guarantee every bit is significant.
        pub const SIGNIFICANT_BITS: u32 = usize::BITS;

        /// Whether [`CanonicalPtr`] stores its integer inside the pointer word
        /// on this target.
        pub const CANONICAL_PACKING: bool = false;

        /// Every address is canonical on targets without spare high bits.
        #[inline]
        pub fn is_canonical(_addr: usize) -> bool {
            true
        }

        struct Repr<T> {
            ptr: *mut T,
            num: u16,
        }

        impl<T> Repr<T> {
            const fn null() -> Self {
                Self {
                    ptr: core::ptr::null_mut(),
                    num: 0,
                }
            }

            #[inline(always)]
            fn ptr(&self) -> *mut T {
                self.ptr
            }

            #[inline(always)]
            fn num(&self) -> u16 {
                self.num
            }

            #[inline(always)]
            fn set_ptr(&mut self, ptr: *mut T) {
                self.ptr = ptr;
            }

            #[inline(always)]
            fn set_num(&mut self, num: u16) {
                self.num = num;
            }

            #[inline(always)]
            fn word(&self) -> usize {
                self.ptr.addr() ^ (self.num as usize).rotate_right(16)
            }
        }
    }
}

/// A pointer sharing one machine word with a 16-bit integer stored in the
/// address bits that canonical addressing leaves unused.
///
/// On x86-64 and AArch64 only the low [`SIGNIFICANT_BITS`] bits of a user
/// address are meaningful and the bits above are a copy of the highest one.
/// The integer occupies those high bits, and [`ptr`](Self::ptr) restores them
/// by sign-extension. On other targets the type falls back to a plain
/// two-field struct with the same API; check [`CANONICAL_PACKING`] to see
/// which representation is active.
pub struct CanonicalPtr<T> {
    repr: Repr<T>,
}

impl<T> CanonicalPtr<T> {
    /// Largest integer the container can hold.
    pub const MAX_NUM: u16 = u16::MAX;

    /// A null pointer paired with zero.
    #[inline]
    pub const fn null() -> Self {
        Self { repr: Repr::null() }
    }

    /// Packs `ptr` and `num`.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not a canonical address.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cacheline_map::CanonicalPtr;
    ///
    /// let mut value = 7u32;
    /// let packed = CanonicalPtr::new(&mut value as *mut u32, 0xBEEF);
    /// assert_eq!(packed.num(), 0xBEEF);
    /// assert_eq!(unsafe { *packed.ptr() }, 7);
    /// ```
    #[inline]
    pub fn new(ptr: *mut T, num: u16) -> Self {
        let mut packed = Self::null();
        packed.set_ptr(ptr);
        packed.set_num(num);
        packed
    }

    /// Packs `ptr` and `num` without validating the address.
    ///
    /// # Safety
    ///
    /// `ptr` must be a canonical address (see [`is_canonical`]); otherwise
    /// its high bits are lost and [`ptr`](Self::ptr) returns a different
    /// address.
    #[inline]
    pub unsafe fn new_unchecked(ptr: *mut T, num: u16) -> Self {
        debug_assert!(is_canonical(ptr.addr()));
        let mut repr = Repr::null();
        repr.set_ptr(ptr);
        repr.set_num(num);
        Self { repr }
    }

    /// Returns the stored pointer, re-sign-extended to its canonical form.
    #[inline(always)]
    pub fn ptr(&self) -> *mut T {
        self.repr.ptr()
    }

    /// Returns the stored integer.
    #[inline(always)]
    pub fn num(&self) -> u16 {
        self.repr.num()
    }

    /// Replaces the pointer, keeping the integer.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not a canonical address.
    #[inline]
    pub fn set_ptr(&mut self, ptr: *mut T) {
        assert!(
            is_canonical(ptr.addr()),
            "pointer {ptr:p} is not a canonical address"
        );
        self.repr.set_ptr(ptr);
    }

    /// Replaces the integer, keeping the pointer.
    #[inline]
    pub fn set_num(&mut self, num: u16) {
        self.repr.set_num(num);
    }
}

impl<T> Clone for CanonicalPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CanonicalPtr<T> {}

impl<T> Clone for Repr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Repr<T> {}

impl<T> Default for CanonicalPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for CanonicalPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr() == other.ptr() && self.num() == other.num()
    }
}

impl<T> Eq for CanonicalPtr<T> {}

impl<T> Hash for CanonicalPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repr.word().hash(state);
    }
}

impl<T> Debug for CanonicalPtr<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CanonicalPtr")
            .field("ptr", &self.ptr())
            .field("num", &self.num())
            .finish()
    }
}
