// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Part files — split a large file into fixed-size parts and join them back.
//!
//! A part set lives flat inside one directory:
//!
//! ```text
//! <dir>/
//!   best.pt.part1          chunk_size bytes
//!   best.pt.part2          chunk_size bytes
//!   best.pt.part3          remainder (1..=chunk_size bytes)
//!   best.pt.manifest.json  optional, see `storage::manifest`
//! ```
//!
//! Ordering comes only from the numeric suffix. Enumeration starts at 1 and
//! stops at the first index that does not exist on disk, so a missing part
//! silently truncates the reconstruction unless a manifest is present.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{DefectError, Result};
use crate::storage::manifest::PartManifest;

// ─────────────────────────────── constants ───────────────────────────────────

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE_MB: u64 = 15;

const PART_INFIX: &str = ".part";

// ─────────────────────────────── naming ──────────────────────────────────────

/// `<base>.part<n>`, `n` starting at 1, no zero padding.
pub fn part_file_name(base: &str, n: usize) -> String {
    format!("{base}{PART_INFIX}{n}")
}

pub fn part_path(dir: &Path, base: &str, n: usize) -> PathBuf {
    dir.join(part_file_name(base, n))
}

/// Split a file name into `(base, index)` if it looks like a part file.
pub fn parse_part_name(file_name: &str) -> Option<(&str, usize)> {
    let (base, idx) = file_name.rsplit_once(PART_INFIX)?;
    if base.is_empty() || idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = idx.parse().ok()?;
    (n > 0).then_some((base, n))
}

/// File name component of `path`, used as the base name of its part set.
pub fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| DefectError::Storage(format!("{path:?} has no usable file name")))
}

/// The contiguous part set for `base` in `dir`, stopping at the first gap.
pub fn enumerate_parts(dir: &Path, base: &str) -> Vec<PathBuf> {
    (1..)
        .map(|n| part_path(dir, base, n))
        .take_while(|p| p.exists())
        .collect()
}

// ─────────────────────────────── reports ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitReport {
    pub parts: usize,
    pub total_bytes: u64,
    /// Hex SHA-256 of the whole source file.
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub parts: usize,
    pub total_bytes: u64,
}

// ─────────────────────────────── ChunkStore ──────────────────────────────────

/// Splits files into `chunk_size` parts and reassembles them.
///
/// Both operations are synchronous and blocking; async callers should wrap
/// them in `spawn_blocking`. No locking is done, so two processes must never
/// split or join the same part set at once.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    chunk_size: usize,
    write_manifest: bool,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self {
            chunk_size: (DEFAULT_CHUNK_SIZE_MB * MIB) as usize,
            write_manifest: false,
        }
    }
}

impl ChunkStore {
    /// Store with an explicit part size in bytes. Zero is rejected.
    pub fn new(chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DefectError::Config("chunk size must be > 0".into()));
        }
        Ok(Self { chunk_size, write_manifest: false })
    }

    /// Store with a part size given in mebibytes.
    pub fn from_mb(mb: u64) -> Result<Self> {
        let bytes = mb
            .checked_mul(MIB)
            .and_then(|b| usize::try_from(b).ok())
            .ok_or_else(|| DefectError::Config(format!("chunk size of {mb} MB is too large")))?;
        Self::new(bytes)
    }

    /// Whether `split` also writes `<base>.manifest.json`.
    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.write_manifest = enabled;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split `source` into `<basename(source)>.part<N>` files under `out_dir`.
    ///
    /// `out_dir` is created if missing. An empty source yields zero parts.
    /// On failure, parts already written are left in place.
    pub fn split(&self, source: &Path, out_dir: &Path) -> Result<SplitReport> {
        let base = base_name(source)?;
        let mut input = File::open(source)?;
        fs::create_dir_all(out_dir)?;

        let mut buf = Vec::new();
        let mut hasher = Sha256::new();
        let mut total_bytes = 0u64;
        let mut part_num = 1usize;

        loop {
            let n = read_block(&mut input, self.chunk_size, &mut buf)?;
            if n == 0 {
                break;
            }
            let block = &buf[..n];
            let path = part_path(out_dir, &base, part_num);
            let mut out = File::create(&path)?;
            out.write_all(block)?;
            out.flush()?;

            hasher.update(block);
            total_bytes += n as u64;
            debug!(part = part_num, bytes = n, path = ?path, "Part written");
            part_num += 1;
        }

        let report = SplitReport {
            parts: part_num - 1,
            total_bytes,
            sha256: hex::encode(hasher.finalize()),
        };

        if self.write_manifest {
            let manifest = PartManifest {
                base_name: base.clone(),
                chunk_size: self.chunk_size as u64,
                parts: report.parts,
                total_bytes: report.total_bytes,
                sha256: report.sha256.clone(),
                created_at: Utc::now(),
            };
            manifest.write(out_dir)?;
        } else if PartManifest::remove(out_dir, &base)? {
            debug!(base = %base, "Removed stale manifest");
        }

        info!(
            source = ?source,
            out_dir = ?out_dir,
            parts = report.parts,
            bytes = report.total_bytes,
            "Split file into parts"
        );
        Ok(report)
    }

    /// Concatenate `<basename(output)>.part1..` from `in_dir` into `output`.
    ///
    /// `output` is created or truncated. Zero parts found is not an error and
    /// produces an empty file. If a manifest for the base name exists it is
    /// checked after the output is written.
    pub fn join(in_dir: &Path, output: &Path) -> Result<JoinReport> {
        if !in_dir.is_dir() {
            return Err(DefectError::Storage(format!(
                "parts directory {in_dir:?} does not exist"
            )));
        }
        let base = base_name(output)?;

        let mut writer = DigestWriter::new(BufWriter::new(File::create(output)?));
        let mut total_bytes = 0u64;
        let mut part_num = 1usize;

        loop {
            let path = part_path(in_dir, &base, part_num);
            if !path.exists() {
                break;
            }
            let mut part = File::open(&path)?;
            let copied = io::copy(&mut part, &mut writer)?;
            total_bytes += copied;
            debug!(part = part_num, bytes = copied, path = ?path, "Part appended");
            part_num += 1;
        }
        writer.flush()?;
        let digest = writer.finish();

        let report = JoinReport { parts: part_num - 1, total_bytes };

        if report.parts == 0 {
            warn_on_foreign_parts(in_dir, &base);
        }

        if let Some(manifest) = PartManifest::load(in_dir, &base)? {
            manifest.verify(report.parts, report.total_bytes, &digest)?;
            debug!(base = %base, "Manifest verified");
        }

        info!(
            in_dir = ?in_dir,
            output = ?output,
            parts = report.parts,
            bytes = report.total_bytes,
            "Joined parts"
        );
        Ok(report)
    }
}

/// Read up to `limit` bytes into `buf`, returning fewer only at end-of-file.
///
/// `buf` is cleared first and grows with the data actually read.
fn read_block<R: Read>(reader: &mut R, limit: usize, buf: &mut Vec<u8>) -> io::Result<usize> {
    buf.clear();
    reader.by_ref().take(limit as u64).read_to_end(buf)
}

/// Names in `dir` that look like parts of a base name other than `base`.
pub fn foreign_part_names(dir: &Path, base: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else { return Vec::new() };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_owned))
        .filter(|name| matches!(parse_part_name(name), Some((b, _)) if b != base))
        .collect();
    names.sort();
    names
}

/// A join that found nothing while other part sets sit in the same directory
/// usually means the output name does not match the split source name.
fn warn_on_foreign_parts(dir: &Path, base: &str) {
    let foreign = foreign_part_names(dir, base);
    if let Some(example) = foreign.first() {
        warn!(
            dir = ?dir,
            expected = base,
            found = foreign.len(),
            example = %example,
            "No parts matched the output name, but other part files are present"
        );
    }
}

/// Writer adapter that hashes everything passing through it.
struct DigestWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, hasher: Sha256::new() }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_names_are_one_based_and_unpadded() {
        assert_eq!(part_file_name("best.pt", 1), "best.pt.part1");
        assert_eq!(part_file_name("best.pt", 12), "best.pt.part12");
    }

    #[test]
    fn parse_part_name_accepts_only_numeric_suffixes() {
        assert_eq!(parse_part_name("best.pt.part3"), Some(("best.pt", 3)));
        assert_eq!(parse_part_name("a.part1.part2"), Some(("a.part1", 2)));
        assert_eq!(parse_part_name("best.pt.part"), None);
        assert_eq!(parse_part_name("best.pt.part0"), None);
        assert_eq!(parse_part_name("best.pt.partx"), None);
        assert_eq!(parse_part_name("best.pt.manifest.json"), None);
        assert_eq!(parse_part_name(".part1"), None);
    }

    #[test]
    fn base_name_uses_file_component() {
        let p = Path::new("models/weights/best_model_50_4.pth");
        assert_eq!(base_name(p).unwrap(), "best_model_50_4.pth");
        assert!(base_name(Path::new("/")).is_err());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        assert!(ChunkStore::new(0).is_err());
        assert!(ChunkStore::from_mb(0).is_err());
        assert_eq!(ChunkStore::default().chunk_size(), 15 * 1024 * 1024);
    }

    #[test]
    fn read_block_fills_across_short_reads() {
        // Chain yields at most the first slice on the first read call.
        let mut reader = (&[1u8, 2][..]).chain(&[3u8, 4, 5][..]);
        let mut buf = Vec::new();
        assert_eq!(read_block(&mut reader, 4, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(read_block(&mut reader, 4, &mut buf).unwrap(), 1);
        assert_eq!(buf, [5]);
        assert_eq!(read_block(&mut reader, 4, &mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_block_does_not_preallocate_the_limit() {
        let mut reader = &[7u8][..];
        let mut buf = Vec::new();
        assert_eq!(read_block(&mut reader, usize::MAX, &mut buf).unwrap(), 1);
        assert!(buf.capacity() < 1024 * 1024);
    }
}
