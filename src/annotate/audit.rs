//! Append-only audit log of annotation rounds.
//!
//! Every prompt sent in every round is recorded with its raw response and
//! parsed value. The controller only writes; nothing reads the log back.

use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex};

/// One prompt/response exchange in one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Round start, RFC 3339.
    pub timestamp: String,
    pub model: String,
    /// Wall time of the batched generation call, seconds.
    pub run_time: f64,
    /// 1-based attempt number.
    #[serde(rename = "try")]
    pub attempt: u32,
    pub argument_id: String,
    pub dimension: String,
    pub prompt_hash: String,
    pub prompt: String,
    pub response: Option<String>,
    pub parsed_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("audit channel closed")]
    Closed,
    #[error("audit worker failed: {0}")]
    Join(String),
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _entry: AuditEntry) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        match self.entries.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
        Ok(())
    }
}

/// JSONL writer running on its own thread.
#[derive(Clone)]
pub struct JsonlAuditSink {
    sender: mpsc::Sender<AuditEntry>,
}

pub struct AuditWorker {
    handle: Option<std::thread::JoinHandle<Result<(), AuditError>>>,
}

impl AuditWorker {
    /// Wait for the writer to drain. Drop every sink clone first.
    pub fn join(mut self) -> Result<(), AuditError> {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(AuditError::Join("audit worker panicked".to_string())),
            },
            None => Ok(()),
        }
    }
}

impl JsonlAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, AuditWorker), AuditError> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (sender, receiver) = mpsc::channel::<AuditEntry>();
        let handle = std::thread::spawn(move || write_audit_loop(file, receiver));
        Ok((
            Self { sender },
            AuditWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.sender.send(entry).map_err(|_| AuditError::Closed)
    }
}

fn write_audit_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<AuditEntry>,
) -> Result<(), AuditError> {
    let mut writer = BufWriter::new(file);
    for entry in receiver {
        let line = serde_json::to_string(&entry).map_err(|e| AuditError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
    }
    writer.flush()?;
    Ok(())
}

pub fn prompt_hash(prompt: &str) -> String {
    blake3::hash(prompt.as_bytes()).to_hex().to_string()
}
