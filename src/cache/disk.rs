//! Size-bounded key/blob store on local disk.
//!
//! # Layout
//!
//! ```text
//! <dir>/journal          header + append-only operation log
//! <dir>/<sha256(key)>    one data file per entry
//! ```
//!
//! The journal header carries a magic line, the store format version and the
//! application version. Any mismatch wipes the directory and starts over.
//! Records follow, one per line:
//!
//! ```text
//! CLEAN <hash> <size>    entry written
//! READ <hash>            entry accessed (LRU bookkeeping)
//! REMOVE <hash>          entry deleted or evicted
//! ```
//!
//! Replaying the journal rebuilds the LRU order. It is rewritten compactly on
//! open and whenever redundant records pile up.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::DiskCacheError;

/// On-disk format version of the store itself.
pub const DISK_FORMAT_VERSION: u32 = 1;

const JOURNAL_FILE: &str = "journal";
const JOURNAL_TMP_FILE: &str = "journal.tmp";
const JOURNAL_MAGIC: &str = "zoomify-stream.disk-store";

/// Redundant records tolerated before the journal is compacted.
const COMPACT_THRESHOLD: usize = 2000;

/// Stable file name for a cache key.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn is_hash(name: &str) -> bool {
    name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
}

struct StoreState {
    /// hash -> size in bytes, most recently used first
    entries: LruCache<String, u64>,
    total_bytes: u64,
    journal: BufWriter<File>,
    redundant_records: usize,
}

/// Journaled LRU blob store bounded by total size.
///
/// All methods perform blocking file I/O; async callers go through
/// [`DiskTier`](super::DiskTier).
pub struct DiskStore {
    dir: PathBuf,
    app_version: u32,
    max_bytes: u64,
    write_sequence: AtomicU64,
    state: Mutex<StoreState>,
}

impl DiskStore {
    /// Open or create a store in `dir`.
    ///
    /// A journal written by another format or application version is
    /// discarded together with every data file.
    pub fn open(
        dir: impl Into<PathBuf>,
        app_version: u32,
        max_bytes: u64,
    ) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let journal_path = dir.join(JOURNAL_FILE);
        let mut entries = if journal_path.exists() {
            match read_journal(&journal_path, app_version)? {
                Some(entries) => entries,
                None => {
                    info!(dir = %dir.display(), "Disk cache version changed, wiping");
                    LruCache::unbounded()
                }
            }
        } else {
            LruCache::unbounded()
        };

        // Drop index entries whose data file vanished
        let missing: Vec<String> = entries
            .iter()
            .filter(|(hash, _)| !dir.join(hash.as_str()).is_file())
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in missing {
            entries.pop(&hash);
        }

        remove_unindexed_files(&dir, &entries)?;

        let total_bytes = entries.iter().map(|(_, size)| *size).sum();
        let journal = write_compacted_journal(&dir, app_version, &entries)?;

        let store = Self {
            dir,
            app_version,
            max_bytes,
            write_sequence: AtomicU64::new(0),
            state: Mutex::new(StoreState {
                entries,
                total_bytes,
                journal,
                redundant_records: 0,
            }),
        };

        {
            let mut state = store.state.lock();
            store.trim_to_budget(&mut state)?;
            state.journal.flush()?;
            info!(
                dir = %store.dir.display(),
                entries = state.entries.len(),
                bytes = state.total_bytes,
                "Disk cache opened"
            );
        }

        Ok(store)
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of all stored blobs.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(&hash_key(key))
    }

    /// Read a blob, marking it as recently used.
    ///
    /// The index lock is not held while the data file is read.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DiskCacheError> {
        let hash = hash_key(key);
        if !self.state.lock().entries.contains(&hash) {
            return Ok(None);
        }

        let read = fs::read(self.dir.join(&hash));

        let mut state = self.state.lock();
        match read {
            Ok(data) => {
                // Evicted while reading; the bytes are still valid
                if state.entries.get(&hash).is_none() {
                    return Ok(Some(data));
                }
                writeln!(state.journal, "READ {}", hash)?;
                state.journal.flush()?;
                state.redundant_records += 1;
                self.compact_if_needed(&mut state)?;
                Ok(Some(data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if state.entries.contains(&hash) {
                    debug!(%key, "Disk cache entry lost its data file");
                    self.forget(&mut state, &hash)?;
                    state.journal.flush()?;
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store a blob, replacing any previous value, then evict down to budget.
    ///
    /// The data file is written before the index lock is taken.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<(), DiskCacheError> {
        let hash = hash_key(key);
        let size = data.len() as u64;

        // Unique temp name so concurrent writers of one key never collide
        let sequence = self.write_sequence.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!("{}.{}.tmp", hash, sequence));
        if let Err(e) = fs::write(&tmp, data) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        fs::rename(&tmp, self.dir.join(&hash))?;

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.put(hash.clone(), size) {
            state.total_bytes -= previous;
            state.redundant_records += 1;
        }
        state.total_bytes += size;
        writeln!(state.journal, "CLEAN {} {}", hash, size)?;

        self.trim_to_budget(&mut state)?;
        state.journal.flush()?;
        self.compact_if_needed(&mut state)
    }

    /// Delete a blob. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, DiskCacheError> {
        let hash = hash_key(key);
        let mut state = self.state.lock();
        if !state.entries.contains(&hash) {
            return Ok(false);
        }
        self.forget(&mut state, &hash)?;
        state.journal.flush()?;
        Ok(true)
    }

    /// Delete every blob and start a fresh journal.
    pub fn clear(&self) -> Result<(), DiskCacheError> {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_bytes = 0;
        state.redundant_records = 0;
        remove_unindexed_files(&self.dir, &state.entries)?;
        state.journal = write_compacted_journal(&self.dir, self.app_version, &state.entries)?;
        info!(dir = %self.dir.display(), "Disk cache cleared");
        Ok(())
    }

    pub fn flush(&self) -> Result<(), DiskCacheError> {
        self.state.lock().journal.flush()?;
        Ok(())
    }

    /// Drop an entry from the index, journal and disk.
    fn forget(&self, state: &mut StoreState, hash: &str) -> Result<(), DiskCacheError> {
        if let Some(size) = state.entries.pop(hash) {
            state.total_bytes -= size;
        }
        writeln!(state.journal, "REMOVE {}", hash)?;
        state.redundant_records += 1;

        match fs::remove_file(self.dir.join(hash)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn trim_to_budget(&self, state: &mut StoreState) -> Result<(), DiskCacheError> {
        while state.total_bytes > self.max_bytes {
            let Some((hash, _)) = state.entries.peek_lru().map(|(h, s)| (h.clone(), *s)) else {
                break;
            };
            debug!(%hash, "Evicting disk cache entry");
            self.forget(state, &hash)?;
        }
        Ok(())
    }

    fn compact_if_needed(&self, state: &mut StoreState) -> Result<(), DiskCacheError> {
        if state.redundant_records >= COMPACT_THRESHOLD
            && state.redundant_records >= state.entries.len()
        {
            state.journal.flush()?;
            state.journal = write_compacted_journal(&self.dir, self.app_version, &state.entries)?;
            state.redundant_records = 0;
        }
        Ok(())
    }
}

// =============================================================================
// Journal I/O
// =============================================================================

fn header(app_version: u32) -> [String; 3] {
    [
        JOURNAL_MAGIC.to_string(),
        DISK_FORMAT_VERSION.to_string(),
        app_version.to_string(),
    ]
}

/// Replay a journal. `Ok(None)` means the header does not match.
fn read_journal(
    path: &Path,
    app_version: u32,
) -> Result<Option<LruCache<String, u64>>, DiskCacheError> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.split('\n');

    for expected in header(app_version) {
        if lines.next() != Some(expected.as_str()) {
            return Ok(None);
        }
    }
    if lines.next() != Some("") {
        return Ok(None);
    }

    let complete = content.ends_with('\n');
    let records: Vec<&str> = lines.collect();
    let mut entries = LruCache::unbounded();

    for (offset, record) in records.iter().enumerate() {
        let line = offset + 5;
        let is_last = offset + 1 == records.len();
        if record.is_empty() && is_last {
            break;
        }

        match parse_record(record) {
            Ok(Record::Clean(hash, size)) => {
                entries.put(hash.to_string(), size);
            }
            Ok(Record::Read(hash)) => {
                entries.get(hash);
            }
            Ok(Record::Remove(hash)) => {
                entries.pop(hash);
            }
            // A torn final write is expected after a crash
            Err(_) if is_last && !complete => break,
            Err(reason) => return Err(DiskCacheError::CorruptJournal { line, reason }),
        }
    }

    Ok(Some(entries))
}

enum Record<'a> {
    Clean(&'a str, u64),
    Read(&'a str),
    Remove(&'a str),
}

fn parse_record(record: &str) -> Result<Record<'_>, String> {
    let mut parts = record.split(' ');
    let op = parts.next().unwrap_or_default();
    let hash = parts
        .next()
        .filter(|hash| is_hash(hash))
        .ok_or_else(|| format!("bad key in {:?}", record))?;

    let parsed = match op {
        "CLEAN" => {
            let size = parts
                .next()
                .and_then(|size| size.parse().ok())
                .ok_or_else(|| format!("bad size in {:?}", record))?;
            Record::Clean(hash, size)
        }
        "READ" => Record::Read(hash),
        "REMOVE" => Record::Remove(hash),
        _ => return Err(format!("unknown operation in {:?}", record)),
    };

    if parts.next().is_some() {
        return Err(format!("trailing data in {:?}", record));
    }
    Ok(parsed)
}

/// Write a journal holding only the live entries and open it for appending.
fn write_compacted_journal(
    dir: &Path,
    app_version: u32,
    entries: &LruCache<String, u64>,
) -> Result<BufWriter<File>, DiskCacheError> {
    let tmp_path = dir.join(JOURNAL_TMP_FILE);
    {
        let mut tmp = BufWriter::new(File::create(&tmp_path)?);
        for line in header(app_version) {
            writeln!(tmp, "{}", line)?;
        }
        writeln!(tmp)?;
        // Least recently used first, so replay restores the order
        for (hash, size) in entries.iter().rev() {
            writeln!(tmp, "CLEAN {} {}", hash, size)?;
        }
        tmp.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    }

    let journal_path = dir.join(JOURNAL_FILE);
    fs::rename(&tmp_path, &journal_path)?;

    let file = OpenOptions::new().append(true).open(&journal_path)?;
    Ok(BufWriter::new(file))
}

/// Delete every file in `dir` that is neither the journal nor an indexed blob.
fn remove_unindexed_files(dir: &Path, entries: &LruCache<String, u64>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == JOURNAL_FILE || entries.contains(&*name) {
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
