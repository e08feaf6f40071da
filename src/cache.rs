//! Persistent chunk cache.
//!
//! One directory per document content hash, holding two gzip-compressed
//! JSON files: `metadata.json.gz` (the [`DocumentMetadata`] plus a mutable
//! `last_accessed` stamp) and `chunks_index.json.gz` (the ordered
//! [`ChunkMetadata`] list). Legacy uncompressed `metadata.json` /
//! `chunks_index.json` remain readable and are upgraded to compressed form
//! on the next write.
//!
//! Reads treat every failure — missing files, truncated gzip, malformed
//! JSON — as a cache miss, never an error. Entries expire after their TTL
//! and whole entries are evicted oldest-`last_accessed`-first once the
//! on-disk total exceeds the configured ceiling.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::models::{ChunkMetadata, DocType, DocumentMetadata};

const METADATA_GZ: &str = "metadata.json.gz";
const CHUNKS_GZ: &str = "chunks_index.json.gz";
const METADATA_LEGACY: &str = "metadata.json";
const CHUNKS_LEGACY: &str = "chunks_index.json";

/// On-disk wrapper around [`DocumentMetadata`]: the document fields are
/// immutable, `last_accessed` is refreshed on every successful load.
/// Legacy entries without it fall back to `created_at`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMetadata {
    #[serde(flatten)]
    document: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_accessed: Option<i64>,
}

/// Per-entry stats row.
#[derive(Debug, Clone)]
pub struct EntryStats {
    pub file_hash: String,
    pub file_path: String,
    pub doc_type: DocType,
    pub chunks: usize,
    pub size_bytes: u64,
    pub created_at: i64,
    pub last_accessed: i64,
}

/// Cache-wide stats summary.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_chunks: usize,
    pub total_size_bytes: u64,
    pub entries: Vec<EntryStats>,
}

/// Filesystem-backed chunk cache.
pub struct ChunkCache {
    root: PathBuf,
    ttl_secs: u64,
    max_size_bytes: u64,
}

impl ChunkCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new(root: PathBuf, ttl_secs: u64, max_size_mb: f64) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory: {}", root.display()))?;
        Ok(Self {
            root,
            ttl_secs,
            max_size_bytes: (max_size_mb * 1024.0 * 1024.0) as u64,
        })
    }

    /// Default TTL applied to new entries.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// Directory an entry lives in (it may not exist yet).
    pub fn entry_path(&self, file_hash: &str) -> PathBuf {
        self.root.join(file_hash)
    }

    /// Identity hash for a source file: any edit to the file (content,
    /// hence mtime or size) produces a different hash, deterministically.
    pub fn file_identity(path: &Path) -> Result<String> {
        let meta = fs::metadata(path)
            .with_context(|| format!("Cannot stat source file: {}", path.display()))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(b"|");
        hasher.update(mtime.to_le_bytes());
        hasher.update(b"|");
        hasher.update(meta.len().to_le_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Persist an entry, fully replacing any prior content for this hash.
    ///
    /// Chunks are written before metadata so a reader never observes a
    /// metadata file without its chunk index; legacy uncompressed files are
    /// removed only after the compressed pair exists.
    pub fn save(&self, meta: &DocumentMetadata, chunks: &[ChunkMetadata]) -> Result<()> {
        let dir = self.entry_path(&meta.file_hash);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache entry: {}", dir.display()))?;

        let chunks_json = serde_json::to_vec(chunks)?;
        write_gzip_atomic(&dir.join(CHUNKS_GZ), &chunks_json)?;

        let stored = StoredMetadata {
            document: meta.clone(),
            last_accessed: Some(meta.created_at),
        };
        let meta_json = serde_json::to_vec(&stored)?;
        write_gzip_atomic(&dir.join(METADATA_GZ), &meta_json)?;

        for legacy in [METADATA_LEGACY, CHUNKS_LEGACY] {
            let path = dir.join(legacy);
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }

        self.evict_over_budget(Some(&meta.file_hash));
        Ok(())
    }

    /// Load an entry, or `None` for anything unusable: absent, expired,
    /// corrupt, or unparseable. A hit refreshes the entry's
    /// `last_accessed` stamp.
    pub fn load(&self, file_hash: &str) -> Option<(DocumentMetadata, Vec<ChunkMetadata>)> {
        let dir = self.entry_path(file_hash);
        let mut stored: StoredMetadata = read_entry_file(&dir, METADATA_GZ, METADATA_LEGACY)?;

        let now = chrono::Utc::now().timestamp();
        let age = now.saturating_sub(stored.document.created_at);
        if age > stored.document.ttl as i64 {
            let _ = fs::remove_dir_all(&dir);
            return None;
        }

        let chunks: Vec<ChunkMetadata> = read_entry_file(&dir, CHUNKS_GZ, CHUNKS_LEGACY)?;

        stored.last_accessed = Some(now);
        match serde_json::to_vec(&stored) {
            Ok(bytes) => {
                if let Err(e) = write_gzip_atomic(&dir.join(METADATA_GZ), &bytes) {
                    eprintln!("Warning: failed to refresh cache access time: {}", e);
                }
            }
            Err(e) => eprintln!("Warning: failed to refresh cache access time: {}", e),
        }

        self.evict_over_budget(Some(file_hash));
        Some((stored.document, chunks))
    }

    /// Remove one entry, or every entry when `file_hash` is `None`.
    /// Returns the number of entries removed.
    pub fn clear(&self, file_hash: Option<&str>) -> Result<usize> {
        match file_hash {
            Some(hash) => {
                let dir = self.entry_path(hash);
                if dir.is_dir() {
                    fs::remove_dir_all(&dir)?;
                    Ok(1)
                } else {
                    Ok(0)
                }
            }
            None => {
                let mut removed = 0;
                for hash in self.entry_hashes()? {
                    fs::remove_dir_all(self.entry_path(&hash))?;
                    removed += 1;
                }
                Ok(removed)
            }
        }
    }

    /// Hashes of every entry directory currently on disk.
    pub fn entry_hashes(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                hashes.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Summarize what the cache holds. Unreadable entries are skipped.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats::default();

        for hash in self.entry_hashes()? {
            let dir = self.entry_path(&hash);
            let stored: StoredMetadata = match read_entry_file(&dir, METADATA_GZ, METADATA_LEGACY)
            {
                Some(s) => s,
                None => continue,
            };
            let size_bytes = dir_size(&dir);

            stats.total_entries += 1;
            stats.total_chunks += stored.document.chunk_count;
            stats.total_size_bytes += size_bytes;
            stats.entries.push(EntryStats {
                file_hash: hash,
                file_path: stored.document.file_path.clone(),
                doc_type: stored.document.doc_type,
                chunks: stored.document.chunk_count,
                size_bytes,
                created_at: stored.document.created_at,
                last_accessed: stored.last_accessed.unwrap_or(stored.document.created_at),
            });
        }

        // Most recently used first.
        stats
            .entries
            .sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        Ok(stats)
    }

    /// Remove whole entries, oldest `last_accessed` first, until the
    /// on-disk total fits the configured ceiling. `protect` shields the
    /// entry currently being written or read.
    fn evict_over_budget(&self, protect: Option<&str>) {
        let stats = match self.stats() {
            Ok(s) => s,
            Err(_) => return,
        };
        if stats.total_size_bytes <= self.max_size_bytes {
            return;
        }

        let mut victims = stats.entries;
        victims.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed));

        let mut total = stats.total_size_bytes;
        for victim in victims {
            if total <= self.max_size_bytes {
                break;
            }
            if protect == Some(victim.file_hash.as_str()) {
                continue;
            }
            if fs::remove_dir_all(self.entry_path(&victim.file_hash)).is_ok() {
                total = total.saturating_sub(victim.size_bytes);
            }
        }
    }
}

/// Read a JSON value from an entry, preferring the compressed file and
/// falling back to the legacy uncompressed one. Any failure is a miss.
fn read_entry_file<T: serde::de::DeserializeOwned>(
    dir: &Path,
    gz_name: &str,
    legacy_name: &str,
) -> Option<T> {
    let gz_path = dir.join(gz_name);
    if gz_path.is_file() {
        return match read_gzip(&gz_path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    eprintln!("Warning: malformed cache file {}: {}", gz_path.display(), e);
                    None
                }
            },
            Err(e) => {
                eprintln!("Warning: unreadable cache file {}: {}", gz_path.display(), e);
                None
            }
        };
    }

    let legacy_path = dir.join(legacy_name);
    if legacy_path.is_file() {
        return match fs::read(&legacy_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(_) => None,
        };
    }

    None
}

fn read_gzip(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Write gzip-compressed bytes via a temp file + rename so a concurrent
/// reader sees either the old or the new complete file.
fn write_gzip_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("gz.tmp");
    {
        let file = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
