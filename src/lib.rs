#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// A pointer-plus-length handle that fits in one word.
pub mod bounded_ref;

/// A fixed-size table kept at exactly as many slots as entries.
pub mod dense_table;

pub mod hash_table;

/// Secondary hashing and the crate's hasher builders.
pub mod hasher;

pub mod layout;

/// Pointers with a small integer packed into otherwise unused bits.
///
/// [`AlignedPtr`] uses the low bits freed by the pointee's alignment.
/// [`CanonicalPtr`] uses the high sixteen bits of a 64-bit canonical address
/// on x86-64 and AArch64, and falls back to a separate field elsewhere.
pub mod packed;

/// A fixed-capacity table with wrap-around linear probing.
pub mod static_table;

pub use bounded_ref::BoundedRef;
pub use dense_table::DenseTable;
pub use hash_table::HashTable;
pub use hash_table::Iter;
pub use hasher::BuildIdentityHasher;
pub use hasher::DefaultHashBuilder;
pub use hasher::GOLDEN_RATIO;
pub use hasher::IdentityHasher;
pub use hasher::secondary_hash;
pub use layout::TableLayout;
pub use packed::AlignedPtr;
pub use packed::CanonicalPtr;
pub use static_table::Drain;
pub use static_table::StaticTable;
