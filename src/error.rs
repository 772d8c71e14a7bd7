//! The store's typed error taxonomy.
//!
//! The original store this crate descends from aborts the process on any
//! fatal condition (bad bounds, I/O failure, mid-file corruption). Per its
//! own design notes, a "higher-quality reimplementation should surface
//! these as typed results without changing the on-disk contract" — that is
//! what this module does. Not-found and tombstone reads are deliberately
//! *not* represented here: they are `Ok(None)`, not an error.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while opening, reading, writing, or
/// compacting a [`crate::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A `std::io` operation (open, read, write, truncate, mmap, rename, …) failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key is empty; every key must be at least one byte.
    #[error("keys must be non-empty")]
    EmptyKey,

    /// `key.len() + 1` (the on-disk length including the terminator) exceeds
    /// the 16-bit `klen` field.
    #[error("key is {len} bytes; the on-disk key length field (including the terminator) caps keys at {max} bytes")]
    KeyTooLarge { len: usize, max: u16 },

    /// The value is larger than `MAX_VLEN` allows.
    #[error("value is {len} bytes, exceeding the maximum of {max} bytes")]
    ValueTooLarge { len: usize, max: u32 },

    /// Growing the mapping would push the file past the `u32::MAX`-byte cap.
    #[error("store file would exceed the {cap}-byte size cap")]
    FileTooLarge { cap: u64 },

    /// The file's stored `num_buckets` prefix disagrees with the value the
    /// caller asked to open the store with.
    #[error("store at {path:?} was created with {on_disk} buckets, but {requested} were requested")]
    BucketCountMismatch {
        path: PathBuf,
        on_disk: u32,
        requested: u32,
    },

    /// Recovery, a lookup, or an iteration walked into a record that fails
    /// validation in a place where it cannot be trailing padding from a
    /// prior growth — i.e. corruption found mid-file rather than at the tail.
    #[error("corrupt record at offset {offset} in {path:?}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        reason: &'static str,
    },
}

/// A `Result` specialized to [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
