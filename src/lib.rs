//! `cairn`: an embedded, single-file, append-only key-value store backed by
//! a memory-mapped hash log.
//!
//! A store is one file. New values are appended, never overwritten in
//! place; each record links back to the previous record that hashed to the
//! same bucket, forming a persistent hash table whose chains double as a
//! crash-recovery log. Opening a store replays that log to rebuild the
//! in-memory bucket index; [`Store::compact`] rewrites the file to drop
//! everything but each key's live value.
//!
//! ```no_run
//! use cairn::Store;
//!
//! # fn main() -> cairn::Result<()> {
//! let mut store = Store::open("example.cairn")?;
//! store.set(b"hello", b"world")?;
//! assert_eq!(store.get(b"hello")?, Some(b"world".to_vec()));
//! store.del(b"hello")?;
//! assert_eq!(store.get(b"hello")?, None);
//! # Ok(())
//! # }
//! ```

mod checksum;
mod error;
mod hash;
mod index;
mod mapping;
mod record;
mod store;

pub use error::{Result, StoreError};
pub use store::{Store, StoreOptions};
