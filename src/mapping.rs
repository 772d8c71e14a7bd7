//! Owns the backing file descriptor and the writable memory mapping, and
//! implements the unmap/truncate/remap growth policy. `mremap(2)` would
//! avoid the remap round-trip on Linux, but `memmap2` does not expose it
//! portably, so this follows the portable unmap-then-remap sequence: the
//! file's contents survive the sequence unchanged, so it is crash-safe the
//! same way the original design requires.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{Mmap, MmapMut};

use crate::error::{Result, StoreError};

/// Slack mapped beyond `eof` so that most appends don't need to grow.
const GROWTH_SLACK: u64 = 128 * 1024;

/// Hard cap on file size: offsets and the mapped length are both `u32`-bounded.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Offset 4 (just past the `num_buckets` prefix) is the smallest legal `eof`.
pub const PREFIX_SIZE: u64 = 4;

fn initial_alloc(eof: u64) -> u64 {
    eof + GROWTH_SLACK
}

/// Opens (creating if necessary) the backing file and reports its current
/// on-disk length.
pub fn open_file(path: &Path) -> Result<(File, u64)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    let len = file.metadata()?.len();
    Ok((file, len))
}

/// Maps an existing file read-only and privately, for the recovery scan.
/// The mapping is dropped (and therefore unmapped) as soon as the caller is
/// done with it; it is never written through.
///
/// # Safety
///
/// The caller must ensure no other process truncates or otherwise shrinks
/// the file out from under this mapping while it is alive. This matches the
/// crate's documented concurrency model: a store's file is owned by one
/// process for the duration of a session.
pub fn map_readonly(file: &File) -> Result<Mmap> {
    let mmap = unsafe { Mmap::map(file)? };
    Ok(mmap)
}

/// A writable shared mapping over `file`, grown in place as records are
/// appended.
pub struct Mapping {
    file: File,
    mmap: MmapMut,
    alloc: u64,
}

impl Mapping {
    /// Truncates `file` to `eof + 128 KiB` of slack and maps it read-write.
    /// Used once, right after `open`/recovery settle on `eof`.
    pub fn open(file: File, eof: u64) -> Result<Self> {
        let alloc = initial_alloc(eof);
        Self::remap_to(file, alloc)
    }

    fn remap_to(file: File, alloc: u64) -> Result<Self> {
        file.set_len(alloc)?;
        // SAFETY: `file` was just sized to `alloc` bytes and is open
        // read-write; no other mapping of it is concurrently active here.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, mmap, alloc })
    }

    /// The current mapped/truncated length of the file.
    pub fn alloc(&self) -> u64 {
        self.alloc
    }

    /// A read view of the whole mapped region.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// A writable view of the whole mapped region.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Grows the mapping, if needed, so that `eof + additional` bytes fit.
    /// Follows §4.2's policy: flush, unmap, compute `alloc + 2 * needed`
    /// clamped to [`MAX_FILE_SIZE`], truncate, remap.
    pub fn ensure_capacity(&mut self, eof: u64, additional: u64) -> Result<()> {
        let needed = eof + additional;
        if needed <= self.alloc {
            return Ok(());
        }
        if self.alloc >= MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge { cap: MAX_FILE_SIZE });
        }

        self.mmap.flush()?;
        let mut new_size = self.alloc + 2 * needed;
        if new_size > MAX_FILE_SIZE {
            new_size = MAX_FILE_SIZE;
        }
        if new_size < needed {
            return Err(StoreError::FileTooLarge { cap: MAX_FILE_SIZE });
        }

        self.file.set_len(new_size)?;
        // SAFETY: `file` was just sized to `new_size` bytes above; the old
        // `mmap` is dropped (unmapped) by this assignment before anyone can
        // observe a mapping inconsistent with the file's new length.
        let mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.mmap = mmap;
        self.alloc = new_size;
        log::debug!("grew mapping to {new_size} bytes to fit eof={eof} + {additional}");
        Ok(())
    }

    /// Flushes the mapping synchronously, giving durability up to this point.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
