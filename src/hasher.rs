use core::hash::BuildHasher;
use core::hash::Hasher;

/// 2^64 divided by the golden ratio, rounded to an odd integer.
///
/// Multiplying by it spreads dense integer hashes across the whole 64-bit
/// range. Keys drawn from a Fibonacci sequence still collide heavily.
pub const GOLDEN_RATIO: u64 = 11_400_714_819_323_198_485;

/// Re-hashes a caller-supplied hash so that weak primary hashes (such as the
/// identity function on integers) still distribute across the table.
#[inline(always)]
pub const fn secondary_hash(hash: u64) -> u64 {
    hash.wrapping_mul(GOLDEN_RATIO)
}

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = std::collections::hash_map::RandomState;
    } else {
        /// The hasher builder used when none is specified.
        pub type DefaultHashBuilder = BuildIdentityHasher;
    }
}

/// A hasher that returns integer keys unchanged.
///
/// Byte slices (strings and other non-integer keys) are folded eight bytes at
/// a time. Pair it with the tables in this crate, which apply
/// [`secondary_hash`] on top; on its own it is a poor general-purpose hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher {
    state: u64,
}

impl IdentityHasher {
    #[inline(always)]
    fn mix(&mut self, word: u64) {
        self.state = self.state.rotate_left(5) ^ word;
    }
}

impl Hasher for IdentityHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(8);
        for chunk in &mut chunks {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.mix(u64::from_le_bytes(word));
        }

        let rest = chunks.remainder();
        if !rest.is_empty() {
            let mut word = [0u8; 8];
            word[..rest.len()].copy_from_slice(rest);
            self.mix(u64::from_le_bytes(word));
        }
    }

    #[inline]
    fn write_u8(&mut self, i: u8) {
        self.mix(i as u64);
    }

    #[inline]
    fn write_u16(&mut self, i: u16) {
        self.mix(i as u64);
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.mix(i as u64);
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.mix(i);
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.mix(i as u64);
    }

    #[inline]
    fn write_i8(&mut self, i: i8) {
        self.mix(i as u8 as u64);
    }

    #[inline]
    fn write_i16(&mut self, i: i16) {
        self.mix(i as u16 as u64);
    }

    #[inline]
    fn write_i32(&mut self, i: i32) {
        self.mix(i as u32 as u64);
    }

    #[inline]
    fn write_i64(&mut self, i: i64) {
        self.mix(i as u64);
    }

    #[inline]
    fn write_isize(&mut self, i: isize) {
        self.mix(i as usize as u64);
    }
}

/// Builds [`IdentityHasher`]s.
///
/// # Examples
///
/// ```rust
/// use core::hash::BuildHasher;
///
/// use cacheline_map::BuildIdentityHasher;
///
/// assert_eq!(BuildIdentityHasher.hash_one(42u64), 42);
/// assert_eq!(BuildIdentityHasher.hash_one(7u32), 7);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildIdentityHasher;

impl BuildHasher for BuildIdentityHasher {
    type Hasher = IdentityHasher;

    #[inline]
    fn build_hasher(&self) -> Self::Hasher {
        IdentityHasher::default()
    }
}
