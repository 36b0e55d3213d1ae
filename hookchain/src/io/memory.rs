//! JSON-backed conversation memory (`.hookchain/memory.json`).
//!
//! Each run leaves one user message (the seed) and one assistant message (the
//! composite, or the fallback text) plus every tool invocation it made.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{FALLBACK_TEXT, RunOutcome, ToolInvocation};
use crate::io::recorder::{RunRecord, RunRecorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: Role,
    pub content: String,
}

impl MemoryMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryDocument {
    pub messages: Vec<MemoryMessage>,
    pub tool_history: Vec<ToolInvocation>,
}

/// File-backed memory store. Every mutation is a locked read-modify-write.
#[derive(Debug)]
pub struct FileMemoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileMemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document; a missing or empty file reads as empty memory.
    pub fn load(&self) -> Result<MemoryDocument> {
        if !self.path.exists() {
            return Ok(MemoryDocument::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(MemoryDocument::default());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("parse memory {}", self.path.display()))
    }

    pub fn append(&self, message: MemoryMessage) -> Result<()> {
        self.update(|doc| doc.messages.push(message))
    }

    pub fn record_tool_call(&self, invocation: ToolInvocation) -> Result<()> {
        self.update(|doc| doc.tool_history.push(invocation))
    }

    fn update(&self, apply: impl FnOnce(&mut MemoryDocument)) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("memory lock poisoned"))?;
        let mut doc = self.load()?;
        apply(&mut doc);
        write_atomic(&self.path, &doc)
    }
}

fn write_atomic(path: &Path, doc: &MemoryDocument) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("memory path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut buf = serde_json::to_string_pretty(doc)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp memory {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace memory {}", path.display()))?;
    Ok(())
}

/// Run recorder that keeps the conversation transcript in a [`FileMemoryStore`].
#[derive(Debug)]
pub struct TranscriptRecorder {
    store: FileMemoryStore,
}

impl TranscriptRecorder {
    pub fn new(store: FileMemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FileMemoryStore {
        &self.store
    }

    fn write(&self, record: &RunRecord) -> Result<()> {
        match record {
            RunRecord::Attempt(attempt) => {
                for invocation in &attempt.tool_calls {
                    self.store.record_tool_call(invocation.clone())?;
                }
            }
            RunRecord::Stage(_) => {}
            RunRecord::Run(result) => {
                let seed = serde_json::to_string(&result.seed).context("serialize seed")?;
                self.store.append(MemoryMessage::new(Role::User, seed))?;
                let reply = match &result.outcome {
                    RunOutcome::Completed { result } => {
                        serde_json::to_string(result).context("serialize content plan")?
                    }
                    RunOutcome::Aborted { .. } => FALLBACK_TEXT.to_string(),
                };
                self.store.append(MemoryMessage::new(Role::Assistant, reply))?;
            }
        }
        Ok(())
    }
}

impl RunRecorder for TranscriptRecorder {
    fn record(&self, run_id: &str, record: &RunRecord) {
        match self.write(record) {
            Ok(()) => debug!(run_id, kind = record.kind(), "transcript updated"),
            Err(err) => {
                warn!(run_id, kind = record.kind(), err = %format!("{err:#}"), "failed to update transcript");
            }
        }
    }
}
