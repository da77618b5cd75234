// Body persistence: per-object files under docs/bodies plus the shared
// docs/sql_bodies.jsonl stream. Body files use distinct per-key paths so
// they can be written from worker threads without contention; the JSONL
// stream is a single appender guarded by a mutex.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::models::BodyRecord;

pub struct BodyWriter {
    output_dir: PathBuf,
    jsonl: Mutex<BufWriter<File>>,
    docs_count: AtomicUsize,
}

impl BodyWriter {
    /// Prepare `docs/bodies/` and truncate `docs/sql_bodies.jsonl`; every
    /// run starts from a clean slate.
    pub fn create(output_dir: &Path) -> Result<BodyWriter> {
        let bodies_dir = output_dir.join("docs").join("bodies");
        fs::create_dir_all(&bodies_dir)
            .with_context(|| format!("creating {}", bodies_dir.display()))?;
        let jsonl_path = output_dir.join("docs").join("sql_bodies.jsonl");
        let jsonl = File::create(&jsonl_path)
            .with_context(|| format!("creating {}", jsonl_path.display()))?;
        Ok(BodyWriter {
            output_dir: output_dir.to_path_buf(),
            jsonl: Mutex::new(BufWriter::new(jsonl)),
            docs_count: AtomicUsize::new(0),
        })
    }

    /// Write one body file and append its JSONL record. `rel_path` is
    /// relative to the output directory and is what node `body_path`
    /// columns carry.
    pub fn write_body(&self, rel_path: &str, body: &str, record: &BodyRecord) -> Result<()> {
        let path = self.output_dir.join(rel_path);
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        let line = serde_json::to_string(record)?;
        {
            let mut jsonl = self
                .jsonl
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writeln!(jsonl, "{line}")?;
        }
        self.docs_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn docs_written(&self) -> usize {
        self.docs_count.load(Ordering::Relaxed)
    }

    pub fn finish(&self) -> Result<()> {
        self.jsonl
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .flush()?;
        Ok(())
    }
}

/// Make a name safe as a single path component. Type and method full names
/// keep their dots; everything a filesystem could object to becomes `_`.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
