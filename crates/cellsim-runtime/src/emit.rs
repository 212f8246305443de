//! Emitter implementations.
//!
//! - [`NullEmitter`] - discards everything
//! - [`MemoryEmitter`] - keeps records in memory, shareable with the caller
//! - [`JsonLinesEmitter`] - one JSON object per line in a file

use cellsim_core::emitter::{EmitRecord, Emitter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl Emitter for NullEmitter {
    fn emit(&mut self, _record: EmitRecord) {}
}

/// Collects records in memory.
///
/// Clones share the same buffer, so a test can keep one handle and hand
/// the other to the environment.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    records: Arc<Mutex<Vec<EmitRecord>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn records(&self) -> Vec<EmitRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Emitter for MemoryEmitter {
    fn emit(&mut self, record: EmitRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Writes records as JSON lines.
///
/// Sink failures are logged once and further records are dropped; they
/// never stop the simulation.
#[derive(Debug)]
pub struct JsonLinesEmitter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl JsonLinesEmitter {
    /// Create (or truncate) the output file.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records successfully written.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn fail(&mut self, error: impl std::fmt::Display) {
        warn!(path = %self.path.display(), %error, "emitter sink failed; dropping further records");
        self.writer = None;
    }
}

impl Emitter for JsonLinesEmitter {
    fn emit(&mut self, record: EmitRecord) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"));
        match result {
            Ok(()) => self.written += 1,
            Err(e) => self.fail(e),
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                self.fail(e);
            }
        }
    }
}

impl Drop for JsonLinesEmitter {
    fn drop(&mut self) {
        self.flush();
    }
}
