//! JSONL record of every classification call.
//!
//! Events are written as they arrive, so an interrupted batch keeps the
//! traces of the messages it already classified.

use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use serde::Serialize;

use crate::classifier::{ClassificationOutcome, ClassifierIdentity};
use crate::types::{FeedbackItem, Label};

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationTrace {
    pub timestamp_ms: i64,
    pub index: usize,
    pub feedback_id: String,
    pub language: String,
    pub model: String,
    pub prompt_template_slug: String,
    pub template_hash: String,
    pub label: Label,
    pub raw_reply: Option<String>,
    pub latency_ms: u64,
    pub error_code: Option<String>,
    pub error: Option<String>,
}

impl ClassificationTrace {
    /// Stamp one finished call with the current wall-clock time.
    pub fn new(
        index: usize,
        item: &FeedbackItem,
        identity: &ClassifierIdentity,
        outcome: &ClassificationOutcome,
    ) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            index,
            feedback_id: item.id.clone(),
            language: item.language.clone(),
            model: identity.model.clone(),
            prompt_template_slug: identity.prompt_template_slug.clone(),
            template_hash: identity.template_hash.clone(),
            label: outcome.label,
            raw_reply: outcome.raw_reply.clone(),
            latency_ms: u64::try_from(outcome.latency.as_millis()).unwrap_or(u64::MAX),
            error_code: outcome.error_code.map(str::to_string),
            error: outcome.error_message.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("failed to write trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode trace: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("trace writer has stopped")]
    Closed,
    #[error("trace writer panicked")]
    WriterPanicked,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: ClassificationTrace) -> Result<(), TraceError>;
}

/// Hands events to a writer thread that appends one JSON object per line.
#[derive(Clone)]
pub struct JsonlTraceSink {
    events: Sender<ClassificationTrace>,
}

/// Owns the writer thread. The thread exits once every sink clone is dropped.
pub struct TraceWorker {
    handle: JoinHandle<Result<(), TraceError>>,
}

impl TraceWorker {
    pub fn join(self) -> Result<(), TraceError> {
        self.handle.join().map_err(|_| TraceError::WriterPanicked)?
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = File::create(path)?;
        let (events, inbox) = mpsc::channel();
        let handle = std::thread::spawn(move || drain_to_file(file, inbox));
        Ok((Self { events }, TraceWorker { handle }))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: ClassificationTrace) -> Result<(), TraceError> {
        self.events.send(event).map_err(|_| TraceError::Closed)
    }
}

fn drain_to_file(file: File, inbox: Receiver<ClassificationTrace>) -> Result<(), TraceError> {
    // LineWriter flushes at every newline.
    let mut out = LineWriter::new(file);
    while let Ok(event) = inbox.recv() {
        serde_json::to_writer(&mut out, &event)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}
