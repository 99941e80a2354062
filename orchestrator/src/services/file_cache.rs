//! Append-only JSON-lines reuse cache backend
//!
//! Each line records references appended to one identity, with a `complete`
//! flag written as part of the record. Lines that fail to parse or are flagged
//! incomplete are skipped and read as misses. Every handle tails the file
//! before reading, so records appended through other handles, including other
//! processes, become visible without reopening.
//!
//! Reservations are lock files created with `create_new` in a sibling
//! `<file>.locks` directory, one per identity. A lock older than the lease is
//! treated as left behind by a crashed owner and may be taken over.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};

use shared::{CacheEntry, ProcessId, SourceIdentity, process_debug, process_warn};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{CacheBackend, CacheLookup};

/// How long a reservation holds before other handles may take it over
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

#[derive(Default)]
struct Index {
    entries: HashMap<SourceIdentity, CacheEntry>,
    /// Identities with an incomplete record and no complete one
    incomplete: HashSet<SourceIdentity>,
}

impl Index {
    /// Apply whole lines; returns how many were skipped
    fn apply(&mut self, content: &str) -> usize {
        let mut skipped = 0;

        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            let record: CacheEntry = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };

            if !record.complete {
                skipped += 1;
                if !self.entries.contains_key(&record.identity) {
                    self.incomplete.insert(record.identity);
                }
                continue;
            }

            self.incomplete.remove(&record.identity);
            match self.entries.get_mut(&record.identity) {
                Some(entry) => {
                    for result in record.results {
                        entry.append(&[result.reference], &result.method, result.created_at);
                    }
                }
                None => {
                    self.entries.insert(record.identity.clone(), record);
                }
            }
        }

        skipped
    }
}

/// Write side of the file plus how far it has been read
struct Log {
    writer: fs::File,
    /// Bytes already applied to the index
    offset: u64,
    /// The file ended without a newline at the last read
    partial_tail: bool,
    /// One of our own writes failed and may have left a partial line
    torn: bool,
}

impl Log {
    /// A new record must start on a fresh line
    fn needs_separator(&self) -> bool {
        self.partial_tail || self.torn
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    identity: SourceIdentity,
    owner: String,
    reserved_at: DateTime<Utc>,
}

pub struct FileCacheBackend {
    path: PathBuf,
    locks: PathBuf,
    lease: Duration,
    index: RwLock<Index>,
    log: Mutex<Log>,
    skipped_lines: AtomicUsize,
}

impl FileCacheBackend {
    /// Open or create the cache file at `path`
    pub async fn open(path: impl AsRef<Path>) -> OrchestratorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let writer = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        let mut locks = path.clone().into_os_string();
        locks.push(".locks");

        let backend = Self {
            locks: PathBuf::from(locks),
            lease: DEFAULT_LEASE,
            index: RwLock::new(Index::default()),
            log: Mutex::new(Log {
                writer,
                offset: 0,
                partial_tail: false,
                torn: false,
            }),
            skipped_lines: AtomicUsize::new(0),
            path,
        };

        {
            let mut log = backend.log.lock().await;
            backend.refresh(&mut log).await?;
            // A torn final line left by a crash must not swallow the next record
            if log.partial_tail {
                log.writer.write_all(b"\n").await?;
                log.writer.flush().await?;
                backend.refresh(&mut log).await?;
            }
        }

        let skipped = backend.skipped_lines();
        if skipped > 0 {
            process_warn!(
                ProcessId::current(),
                "⚠️ Skipped {} unreadable or incomplete cache record(s) in {}",
                skipped,
                backend.path.display()
            );
        }
        process_debug!(
            ProcessId::current(),
            "📁 Opened reuse cache {} with {} entries",
            backend.path.display(),
            backend.index.read().await.entries.len()
        );

        Ok(backend)
    }

    /// Override the reservation lease. A zero lease makes every lock stale.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding reservation lock files
    pub fn locks_dir(&self) -> &Path {
        &self.locks
    }

    /// Lines ignored while reading the file
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines.load(Ordering::Relaxed)
    }

    /// Apply whatever complete lines were appended since the last read
    async fn refresh(&self, log: &mut Log) -> OrchestratorResult<()> {
        let len = fs::metadata(&self.path).await?.len();
        if len <= log.offset {
            return Ok(());
        }

        let mut reader = fs::File::open(&self.path).await?;
        reader.seek(SeekFrom::Start(log.offset)).await?;
        let mut buf = Vec::new();
        reader.take(len - log.offset).read_to_end(&mut buf).await?;

        let whole = buf.iter().rposition(|byte| *byte == b'\n').map_or(0, |last| last + 1);
        log.partial_tail = whole < buf.len();
        if whole == 0 {
            return Ok(());
        }

        let content = String::from_utf8_lossy(&buf[..whole]);
        let skipped = self.index.write().await.apply(&content);
        log.offset += whole as u64;
        self.skipped_lines.fetch_add(skipped, Ordering::Relaxed);
        Ok(())
    }

    async fn tail(&self) -> OrchestratorResult<()> {
        let mut log = self.log.lock().await;
        self.refresh(&mut log).await
    }

    fn lock_path(&self, identity: &SourceIdentity) -> PathBuf {
        let digest = Sha256::digest(identity.as_str().as_bytes());
        self.locks.join(format!("{}.lock", hex::encode(digest)))
    }

    /// Owner and age of the lock at `path`, `None` when there is no lock
    async fn read_lock(&self, path: &Path) -> OrchestratorResult<Option<(Option<String>, Duration)>> {
        let content = match fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<LockRecord>(&content) {
            Ok(lock) => {
                let age = (Utc::now() - lock.reserved_at).to_std().unwrap_or(Duration::ZERO);
                Ok(Some((Some(lock.owner), age)))
            }
            // Still being written, or damaged; fall back to the file's age
            Err(_) => {
                let modified = match fs::metadata(path).await {
                    Ok(metadata) => metadata.modified()?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                Ok(Some((None, modified.elapsed().unwrap_or(Duration::ZERO))))
            }
        }
    }

    async fn remove_lock(path: &Path) -> OrchestratorResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheBackend for FileCacheBackend {
    async fn load(&self, identity: &SourceIdentity) -> OrchestratorResult<CacheLookup> {
        self.tail().await?;
        let index = self.index.read().await;
        Ok(match index.entries.get(identity) {
            Some(entry) => CacheLookup::Found(entry.clone()),
            None if index.incomplete.contains(identity) => CacheLookup::Incomplete,
            None => CacheLookup::Missing,
        })
    }

    async fn append(&self, identity: &SourceIdentity, references: &[String], method: &str) -> OrchestratorResult<CacheEntry> {
        // Log lock orders file records and index updates together
        let mut log = self.log.lock().await;
        self.refresh(&mut log).await?;

        let mut delta = CacheEntry::new(identity.clone());
        {
            let index = self.index.read().await;
            let existing = index.entries.get(identity);
            let fresh: Vec<String> = references
                .iter()
                .filter(|reference| existing.is_none_or(|entry| !entry.references().contains(*reference)))
                .cloned()
                .collect();
            delta.append(&fresh, method, Utc::now());
            if delta.results.is_empty() {
                if let Some(entry) = existing {
                    return Ok(entry.clone());
                }
            }
        }

        let mut line = String::new();
        if log.needs_separator() {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&delta)?);
        line.push('\n');

        let written = match log.writer.write_all(line.as_bytes()).await {
            Ok(()) => log.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log.torn = true;
            return Err(OrchestratorError::CacheError {
                message: format!("append to {} failed: {e}", self.path.display()),
            });
        }
        log.torn = false;

        self.refresh(&mut log).await?;
        let index = self.index.read().await;
        index
            .entries
            .get(identity)
            .cloned()
            .ok_or_else(|| OrchestratorError::CacheError {
                message: format!("record for {identity} missing from {} after append", self.path.display()),
            })
    }

    async fn scan(&self) -> OrchestratorResult<Vec<CacheEntry>> {
        self.tail().await?;
        let index = self.index.read().await;
        Ok(index.entries.values().cloned().collect())
    }

    async fn try_reserve(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<bool> {
        fs::create_dir_all(&self.locks).await?;
        let path = self.lock_path(identity);
        let body = serde_json::to_vec(&LockRecord {
            identity: identity.clone(),
            owner: owner.to_string(),
            reserved_at: Utc::now(),
        })?;

        for attempt in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.flush().await?;
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let stale = match self.read_lock(&path).await? {
                        Some((_, age)) => age >= self.lease,
                        // Released between the create and the read
                        None => true,
                    };
                    if attempt > 0 || !stale {
                        return Ok(false);
                    }
                    process_warn!(ProcessId::current(), "⚠️ Taking over stale reservation for {}", identity);
                    Self::remove_lock(&path).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(false)
    }

    async fn release(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<()> {
        let path = self.lock_path(identity);
        match self.read_lock(&path).await? {
            Some((Some(holder), _)) if holder == owner => Self::remove_lock(&path).await,
            _ => Ok(()),
        }
    }

    async fn is_reserved(&self, identity: &SourceIdentity) -> OrchestratorResult<bool> {
        let path = self.lock_path(identity);
        Ok(self.read_lock(&path).await?.is_some_and(|(_, age)| age < self.lease))
    }
}
