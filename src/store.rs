//! The public `Store` type: open/recover, point lookups, writes, iteration,
//! and compaction, all layered on [`crate::mapping::Mapping`],
//! [`crate::index::BucketIndex`], and [`crate::record`].

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::hash::bucket_for;
use crate::index::BucketIndex;
use crate::mapping::{self, Mapping, PREFIX_SIZE};
use crate::record::{self, encoded_len, StopReason, MAX_KLEN, MAX_VLEN, NONE};

/// Tuning knobs for opening a [`Store`].
///
/// There is no external configuration file: every knob here is a value a
/// caller must decide at open time, not something to be discovered from the
/// environment, so a builder on the open call is the whole configuration
/// surface.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    num_buckets: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { num_buckets: 1024 }
    }
}

impl StoreOptions {
    /// Starts from the default bucket count (1024).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of hash buckets a *new* store is created with. Has no
    /// effect when opening a store that already exists on disk; its own
    /// on-disk bucket count is authoritative and a mismatch is reported as
    /// [`StoreError::BucketCountMismatch`].
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is `0`.
    pub fn num_buckets(mut self, num_buckets: u32) -> Self {
        assert!(num_buckets > 0, "a store needs at least one bucket");
        self.num_buckets = num_buckets;
        self
    }

    /// Opens or creates the store at `path` with these options.
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Store> {
        Store::open_with(path.as_ref(), self.num_buckets)
    }
}

/// Number of slots in the rolling seek-count window behind [`Store::seek_average`].
const SEEK_WINDOW_SIZE: usize = 100;

/// A fixed-size, zero-initialized circular buffer of chain-walk lengths
/// from recent successful `get` calls. The divisor for the average is
/// always [`SEEK_WINDOW_SIZE`], even before the window has filled once, so
/// the reported average naturally starts low and rises as real samples
/// displace the initial zeros.
struct SeekWindow {
    samples: [u64; SEEK_WINDOW_SIZE],
    next: usize,
}

impl SeekWindow {
    fn new() -> Self {
        Self {
            samples: [0; SEEK_WINDOW_SIZE],
            next: 0,
        }
    }

    fn record(&mut self, seeks: u64) {
        self.samples[self.next] = seeks;
        self.next = (self.next + 1) % SEEK_WINDOW_SIZE;
    }

    fn average(&self) -> f64 {
        self.samples.iter().sum::<u64>() as f64 / SEEK_WINDOW_SIZE as f64
    }
}

/// A single-file, append-only, memory-mapped key-value store.
pub struct Store {
    path: PathBuf,
    mapping: Mapping,
    index: BucketIndex,
    eof: u64,
    /// Interior mutability: `get` takes `&self` (it performs no writes to
    /// the file), but still needs to record a seek count per successful hit.
    seek_window: RefCell<SeekWindow>,
}

impl Store {
    /// Opens (creating if necessary) the store at `path` with 1024 buckets.
    /// Use [`StoreOptions`] for a non-default bucket count.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        StoreOptions::default().open(path)
    }

    fn open_with(path: &Path, requested_buckets: u32) -> Result<Self> {
        let (file, file_len) = mapping::open_file(path)?;

        let (num_buckets, creating) = if file_len < PREFIX_SIZE {
            (requested_buckets, true)
        } else {
            let on_disk = read_bucket_count_prefix(&file, path)?;
            if on_disk != requested_buckets {
                return Err(StoreError::BucketCountMismatch {
                    path: path.to_path_buf(),
                    on_disk,
                    requested: requested_buckets,
                });
            }
            (on_disk, false)
        };

        let mut index = BucketIndex::new(num_buckets);

        let eof = if creating {
            PREFIX_SIZE
        } else {
            recover(&file, path, file_len, &mut index)?
        };

        let mut mapping = Mapping::open(file, eof)?;
        if creating {
            mapping.as_mut_slice()[0..4].copy_from_slice(&num_buckets.to_le_bytes());
            mapping.flush()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            mapping,
            index,
            eof,
            seek_window: RefCell::new(SeekWindow::new()),
        })
    }

    /// The number of hash buckets this store was created with.
    pub fn bucket_count(&self) -> u32 {
        self.index.num_buckets()
    }

    /// Looks up `key`, returning a freshly allocated copy of its current
    /// value, or `None` if the key has never been set or was deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let bucket = bucket_for(key, self.bucket_count());
        let mut offset = self.index.head(bucket);
        let data = self.mapping.as_slice();
        let mut seeks = 0u64;

        while offset != NONE {
            seeks += 1;
            let parsed = record::parse(data, offset).map_err(|reason| corrupt(&self.path, offset, reason))?;
            if keys_match(parsed.key, key) {
                self.seek_window.borrow_mut().record(seeks);
                return Ok(if parsed.vlen == 0 { None } else { Some(parsed.value.to_vec()) });
            }
            offset = parsed.previous;
        }
        Ok(None)
    }

    /// Sets `key` to `value`, appending a new record and linking it to the
    /// front of its bucket's chain. An empty `value` is rejected; use
    /// [`Store::del`] to remove a key.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validate_key(key)?;
        if value.len() > MAX_VLEN as usize {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: MAX_VLEN,
            });
        }
        self.append(key, value)
    }

    /// Marks `key` as deleted by appending a tombstone record (a record with
    /// an empty value). A no-op, in terms of the final lookup result, if
    /// `key` was never set.
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        self.validate_key(key)?;
        self.append(key, &[])
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        if key.len() + 1 > MAX_KLEN as usize {
            return Err(StoreError::KeyTooLarge {
                len: key.len(),
                max: MAX_KLEN,
            });
        }
        Ok(())
    }

    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let bucket = bucket_for(key, self.bucket_count());
        let total = encoded_len(key.len(), value.len());

        self.mapping.ensure_capacity(self.eof, total as u64)?;

        let previous = self.index.head(bucket);
        let write_offset = self.eof;
        let start = usize::try_from(write_offset).expect("offsets fit usize on supported platforms");
        let end = start + total;
        record::encode(&mut self.mapping.as_mut_slice()[start..end], key, value, previous);

        self.index.push(bucket, write_offset);
        self.eof += total as u64;
        Ok(())
    }

    /// Flushes all appended records to disk.
    pub fn sync(&self) -> Result<()> {
        self.mapping.flush()
    }

    /// Flushes the store. Equivalent to calling [`Store::sync`]; provided
    /// for symmetry with [`Store::open`] and to give callers an explicit
    /// point to handle a final I/O error before the store is dropped.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Calls `f` once for every live (non-tombstoned) key, with its current
    /// value, in no particular order. Only the most recent record for a
    /// given key is visited, even though older records for the same key may
    /// still be present in the file.
    pub fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let data = self.mapping.as_slice();
        let mut seen: HashSet<&[u8]> = HashSet::new();

        for bucket in 0..self.bucket_count() {
            let mut offset = self.index.head(bucket);
            while offset != NONE {
                let parsed = record::parse(data, offset).map_err(|reason| corrupt(&self.path, offset, reason))?;
                let raw_key = &parsed.key[..parsed.key.len() - 1];
                if seen.insert(raw_key) && parsed.vlen != 0 {
                    f(raw_key, parsed.value)?;
                }
                offset = parsed.previous;
            }
        }
        Ok(())
    }

    /// Rewrites the store's file, keeping only the most recent value for
    /// each live key and discarding tombstones and superseded records. The
    /// new file replaces the old one atomically via rename. `new_num_buckets`
    /// resizes the bucket array; `None` keeps the current count.
    pub fn compact(&mut self, new_num_buckets: Option<u32>) -> Result<()> {
        let num_buckets = new_num_buckets.unwrap_or_else(|| self.bucket_count());

        let before = std::fs::metadata(&self.path)?.len();
        log::info!("compacting {:?} ({before} bytes on disk)", self.path);

        let temp_path = compaction_temp_path(&self.path);
        // A prior compaction may have crashed before the rename below; start
        // from a clean file rather than recovering (and appending on top
        // of) whatever it left behind.
        let _ = std::fs::remove_file(&temp_path);
        {
            let mut temp = StoreOptions::new().num_buckets(num_buckets).open(&temp_path)?;
            self.iterate(|k, v| temp.set(k, v))?;
            temp.sync()?;
        }

        std::fs::rename(&temp_path, &self.path)?;
        *self = Store::open_with(&self.path, num_buckets)?;

        let after = std::fs::metadata(&self.path)?.len();
        log::info!("compacted {:?}: {before} -> {after} bytes", self.path);
        Ok(())
    }

    /// The arithmetic mean of the last [`SEEK_WINDOW_SIZE`] chain-walk
    /// lengths from successful `get` calls (zero-initialized, so this is
    /// well-defined even before the window has filled once).
    pub fn seek_average(&self) -> f64 {
        self.seek_window.borrow().average()
    }
}

fn keys_match(stored_key: &[u8], query_key: &[u8]) -> bool {
    stored_key.len() == query_key.len() + 1 && &stored_key[..query_key.len()] == query_key
}

fn corrupt(path: &Path, offset: u64, reason: StopReason) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        offset,
        reason: stop_reason_str(reason),
    }
}

fn stop_reason_str(reason: StopReason) -> &'static str {
    match reason {
        StopReason::ShortHeader => "short header",
        StopReason::BadVersion => "unsupported version",
        StopReason::ZeroKeyLen => "zero-length key",
        StopReason::ValueTooLarge => "value length out of range",
        StopReason::NonZeroFlags => "non-zero reserved flags",
        StopReason::TruncatedRecord => "truncated record body",
        StopReason::ChecksumMismatch => "checksum mismatch",
    }
}

fn read_bucket_count_prefix(file: &File, path: &Path) -> Result<u32> {
    let mmap = mapping::map_readonly(file)?;
    if mmap.len() < PREFIX_SIZE as usize {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            offset: 0,
            reason: "file too short to hold the bucket-count prefix",
        });
    }
    Ok(u32::from_le_bytes(mmap[0..4].try_into().unwrap()))
}

/// Walks every record from offset 4 to the end of the file, rebuilding
/// `index` as it goes and stopping at the first invalid or torn record.
/// Returns the offset just past the last valid record: the effective end of
/// file, discarding anything after it as uncommitted/corrupt trailing data.
fn recover(file: &File, path: &Path, file_len: u64, index: &mut BucketIndex) -> Result<u64> {
    let mmap = mapping::map_readonly(file)?;
    let data = &mmap[..];

    let mut offset = PREFIX_SIZE;
    loop {
        if offset >= file_len {
            log::debug!("recovery reached clean end of file at offset {offset}");
            break;
        }
        match record::parse(data, offset) {
            Ok(parsed) => {
                let raw_key = &parsed.key[..parsed.key.len() - 1];
                let bucket = bucket_for(raw_key, index.num_buckets());
                let prior_head = index.push(bucket, offset);
                if prior_head != parsed.previous {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        offset,
                        reason: "record's previous link disagrees with the bucket chain built so far",
                    });
                }
                offset += parsed.len as u64;
            }
            Err(reason) => {
                log::warn!(
                    "recovery stopped at offset {offset} in {path:?}: {}",
                    stop_reason_str(reason)
                );
                break;
            }
        }
    }
    Ok(offset)
}

fn compaction_temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}
