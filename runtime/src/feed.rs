//! JSONL run feed: one line per pipeline run, newest last.
//!
//! - Append-only, so downstream consumers can tail it
//! - Rotated when the file exceeds `MAX_FEED_SIZE` (50 MB)
//! - Rotated files named `.1`, `.2`, etc. (max 5 rotations)

use anyhow::{Context, Result};
use casewatch::RunResult;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Feed size before rotation (50 MB).
const MAX_FEED_SIZE: u64 = 50 * 1024 * 1024;

/// Rotated feed files to keep.
const MAX_ROTATIONS: u32 = 5;

/// Append-only JSONL writer with rotation.
pub struct RunFeed {
    file: File,
    path: PathBuf,
    current_size: u64,
    max_size: u64,
}

impl RunFeed {
    /// Open or create the feed file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open run feed: {}", path.display()))?;

        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            current_size,
            max_size: MAX_FEED_SIZE,
        })
    }

    /// Override the rotation threshold.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_size = bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one run result.
    pub fn append(&mut self, result: &RunResult) -> Result<()> {
        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        let json = serde_json::to_string(result)?;
        writeln!(self.file, "{json}").context("failed to write run feed")?;
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Shift `runs.jsonl` → `runs.jsonl.1`, `.1` → `.2`, and so on.
    fn rotate(&mut self) -> Result<()> {
        self.file.flush()?;

        let oldest = rotation_path(&self.path, MAX_ROTATIONS);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }
        for i in (1..MAX_ROTATIONS).rev() {
            let from = rotation_path(&self.path, i);
            if from.exists() {
                let _ = std::fs::rename(&from, rotation_path(&self.path, i + 1));
            }
        }
        let _ = std::fs::rename(&self.path, rotation_path(&self.path, 1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to reopen run feed after rotation")?;
        self.current_size = 0;
        tracing::debug!("rotated run feed {}", self.path.display());
        Ok(())
    }
}

/// Read the most recent `limit` results from the live feed file, newest first.
///
/// Lines that fail to parse are skipped.
pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<RunResult>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open run feed: {}", path.display()))?;

    let mut results: Vec<RunResult> = BufReader::new(file)
        .lines()
        .map_while(|line| line.ok())
        .filter_map(|line| serde_json::from_str(&line).ok())
        .collect();
    results.reverse();
    results.truncate(limit);
    Ok(results)
}

fn rotation_path(base: &Path, index: u32) -> PathBuf {
    let name = format!(
        "{}.{index}",
        base.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("runs.jsonl")
    );
    base.with_file_name(name)
}
