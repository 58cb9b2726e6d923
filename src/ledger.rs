// 📒 Canonical Ledger - the per-game CSV of draw records
// Fixed header, one record per line, ascending by (date, session). The only file this crate owns.

use crate::error::{IngestError, Result};
use crate::game::GameSpec;
use crate::record::DrawRecord;
use csv::{ReaderBuilder, Terminator, WriterBuilder};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Serialized content matched the file on disk
    Unchanged,
    Rewritten { rows: usize },
    Appended { rows: usize },
}

impl WriteOutcome {
    pub fn wrote(&self) -> bool {
        !matches!(self, WriteOutcome::Unchanged)
    }
}

/// SHA-256 of serialized ledger bytes, lowercase hex
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct Ledger {
    game: GameSpec,
    path: PathBuf,
}

impl Ledger {
    pub fn new(game: &GameSpec, path: impl Into<PathBuf>) -> Self {
        Ledger {
            game: game.clone(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// All records on disk; a missing file is an empty ledger
    pub fn read(&self) -> Result<Vec<DrawRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let expected = self.game.header();
        let found: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if found != expected {
            return Err(IngestError::HeaderMismatch {
                expected: expected.join(","),
                found: found.join(","),
            });
        }

        let mut records = Vec::new();
        for (i, row) in reader.records().enumerate() {
            let row = row?;
            let fields: Vec<&str> = row.iter().collect();
            // +2: 1-based lines plus the header
            records.push(DrawRecord::from_row(&self.game, &fields, i + 2)?);
        }

        debug!(path = %self.path.display(), rows = records.len(), "ledger read");
        Ok(records)
    }

    /// Header plus rows, newline-terminated
    pub fn serialize(&self, records: &[DrawRecord]) -> Result<Vec<u8>> {
        let mut writer = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(self.game.header())?;
        for record in records {
            writer.write_record(record.to_row(&self.game))?;
        }
        writer
            .into_inner()
            .map_err(|e| IngestError::Io(e.into_error()))
    }

    /// Digest of the file on disk, if any
    pub fn current_digest(&self) -> Result<Option<String>> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(digest(&fs::read(&self.path)?)))
    }

    /// Replace the whole file via a temp file + rename; no write when content is identical
    pub fn write_atomic(&self, records: &[DrawRecord]) -> Result<WriteOutcome> {
        let bytes = self.serialize(records)?;
        if self.current_digest()?.as_deref() == Some(digest(&bytes).as_str()) {
            debug!(path = %self.path.display(), "ledger unchanged, skipping write");
            return Ok(WriteOutcome::Unchanged);
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        info!(path = %self.path.display(), rows = records.len(), "ledger rewritten");
        Ok(WriteOutcome::Rewritten {
            rows: records.len(),
        })
    }

    /// Append rows that sort after everything already on disk
    pub fn append(&self, records: &[DrawRecord]) -> Result<WriteOutcome> {
        if records.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }
        if !self.exists() {
            return self.write_atomic(records);
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);
        for record in records {
            writer.write_record(record.to_row(&self.game))?;
        }
        writer.flush()?;

        info!(path = %self.path.display(), rows = records.len(), "ledger appended");
        Ok(WriteOutcome::Appended {
            rows: records.len(),
        })
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger.csv".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}
