//! Run recording: per-run JSONL trail plus a final summary file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{Attempt, RunResult, StageRecord};

/// Record emitted by the chain, tagged by `kind` when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunRecord {
    Attempt(Attempt),
    Stage(StageRecord),
    Run(RunResult),
}

impl RunRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attempt(_) => "attempt",
            Self::Stage(_) => "stage",
            Self::Run(_) => "run",
        }
    }
}

/// Sink for run records.
///
/// Recording is fire-and-forget: implementations log their own failures and
/// never fail the run.
pub trait RunRecorder {
    fn record(&self, run_id: &str, record: &RunRecord);
}

impl<T: RunRecorder + ?Sized> RunRecorder for &T {
    fn record(&self, run_id: &str, record: &RunRecord) {
        (**self).record(run_id, record);
    }
}

impl<A: RunRecorder, B: RunRecorder> RunRecorder for (A, B) {
    fn record(&self, run_id: &str, record: &RunRecord) {
        self.0.record(run_id, record);
        self.1.record(run_id, record);
    }
}

impl<T: RunRecorder> RunRecorder for Option<T> {
    fn record(&self, run_id: &str, record: &RunRecord) {
        if let Some(inner) = self {
            inner.record(run_id, record);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub records_path: PathBuf,
    pub summary_path: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            records_path: dir.join("records.jsonl"),
            summary_path: dir.join("run.json"),
            dir,
        }
    }
}

/// Writes `<runs_dir>/<run_id>/records.jsonl` and `run.json`.
///
/// Each run owns its directory, so concurrent runs never share a file.
#[derive(Debug, Clone)]
pub struct FileRunRecorder {
    runs_dir: PathBuf,
}

impl FileRunRecorder {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn paths(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.runs_dir, run_id)
    }

    /// Fallible variant of [`RunRecorder::record`].
    pub fn write_record(&self, run_id: &str, record: &RunRecord) -> Result<RunPaths> {
        let paths = self.paths(run_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run dir {}", paths.dir.display()))?;

        let mut line = serde_json::to_string(record).context("serialize run record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.records_path)
            .with_context(|| format!("open {}", paths.records_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", paths.records_path.display()))?;

        if let RunRecord::Run(result) = record {
            write_json(&paths.summary_path, result)?;
        }
        debug!(run_id, kind = record.kind(), "run record written");
        Ok(paths)
    }
}

impl RunRecorder for FileRunRecorder {
    fn record(&self, run_id: &str, record: &RunRecord) {
        if let Err(err) = self.write_record(run_id, record) {
            warn!(run_id, kind = record.kind(), err = %format!("{err:#}"), "failed to record run");
        }
    }
}

/// Read back every record of a run, in write order.
pub fn read_records(path: &Path) -> Result<Vec<RunRecord>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
