//! Append-only record of a session's chat lines.
//!
//! Both loops push entries through a cheap [`TranscriptHandle`]. A single blocking worker owns
//! every [`TranscriptSink`] and applies entries one at a time, so sinks never see concurrent
//! appends and a slow disk never stalls the chat itself. Sink failures are logged and counted,
//! then forgotten.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::html::{Element, Page};
use crate::message::{Role, TranscriptEntry};

/// Format of the session start stamp written at the top of a text log.
pub const SESSION_STAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Something that records transcript entries.
pub trait TranscriptSink: Send {
    fn append(&mut self, entry: &TranscriptEntry) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Plain text log, opened in append mode so consecutive sessions share one file.
#[derive(Debug)]
pub struct LogFileSink {
    file: File,
}

impl LogFileSink {
    pub fn open(path: &Path, started: DateTime<Local>) -> Result<LogFileSink, SinkError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        write!(file, "{}\n\n", started.format(SESSION_STAMP_FORMAT))?;
        file.flush()?;
        Ok(LogFileSink { file })
    }
}

impl TranscriptSink for LogFileSink {
    fn append(&mut self, entry: &TranscriptEntry) -> Result<(), SinkError> {
        writeln!(self.file, "[{}]:\t{}", entry.role, entry.text)?;
        self.file.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }
}

/// Keeps an HTML page of the conversation, rewriting the whole document after every entry.
#[derive(Debug)]
pub struct HtmlFileSink {
    path: PathBuf,
    page: Page,
}

impl HtmlFileSink {
    pub fn open(path: &Path, title: &str) -> Result<HtmlFileSink, SinkError> {
        let sink = HtmlFileSink {
            path: path.to_path_buf(),
            page: Page::new(title),
        };
        sink.write_page()?;
        Ok(sink)
    }

    fn write_page(&self) -> Result<(), SinkError> {
        std::fs::write(&self.path, self.page.render())?;
        Ok(())
    }
}

impl TranscriptSink for HtmlFileSink {
    fn append(&mut self, entry: &TranscriptEntry) -> Result<(), SinkError> {
        let class = entry.role.label().to_lowercase();
        self.page
            .body_mut()
            .append_child(Element::new("div").attr("class", class).text(entry.text.as_str()));
        self.write_page()
    }
}

/// Entries kept in memory. Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Just the text of each entry, in append order.
    pub fn texts(&self) -> Vec<String> {
        self.entries().into_iter().map(|entry| entry.text).collect()
    }
}

impl TranscriptSink for MemorySink {
    fn append(&mut self, entry: &TranscriptEntry) -> Result<(), SinkError> {
        self.entries
            .lock()
            .map_err(|_| SinkError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

/// What the writer managed to do by the time it was closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptStats {
    /// Entries handed to the writer.
    pub entries: usize,
    /// Individual sink appends or flushes that failed.
    pub failures: usize,
}

/// Cloneable sender side of a [`Transcript`].
#[derive(Debug, Clone)]
pub struct TranscriptHandle {
    tx: Option<mpsc::UnboundedSender<TranscriptEntry>>,
}

impl TranscriptHandle {
    /// Queues a line. Never blocks and never fails, a missing writer just drops it.
    pub fn append(&self, role: Role, text: &str) {
        if let Some(tx) = &self.tx {
            if tx.send(TranscriptEntry::new(role, text)).is_err() {
                debug!("transcript writer is gone, dropping entry");
            }
        }
    }
}

/// Owns the background writer.
#[derive(Debug)]
pub struct Transcript {
    handle: TranscriptHandle,
    worker: Option<JoinHandle<TranscriptStats>>,
}

impl Transcript {
    /// Starts the writer on tokio's blocking pool. Must be called from within a runtime.
    pub fn spawn(sinks: Vec<Box<dyn TranscriptSink>>) -> Transcript {
        if sinks.is_empty() {
            return Transcript::disabled();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || drain(rx, sinks));
        Transcript {
            handle: TranscriptHandle { tx: Some(tx) },
            worker: Some(worker),
        }
    }

    /// A transcript that records nothing.
    pub fn disabled() -> Transcript {
        Transcript {
            handle: TranscriptHandle { tx: None },
            worker: None,
        }
    }

    pub fn handle(&self) -> TranscriptHandle {
        self.handle.clone()
    }

    /// Waits for every queued entry to be written, then flushes the sinks.
    ///
    /// Entries from handles still alive keep the writer running, so drop those first.
    pub async fn close(self) -> TranscriptStats {
        let Transcript { handle, worker } = self;
        drop(handle);

        match worker {
            Some(worker) => worker.await.unwrap_or_else(|err| {
                warn!(%err, "transcript writer stopped abnormally");
                TranscriptStats::default()
            }),
            None => TranscriptStats::default(),
        }
    }
}

fn drain(
    mut rx: mpsc::UnboundedReceiver<TranscriptEntry>,
    mut sinks: Vec<Box<dyn TranscriptSink>>,
) -> TranscriptStats {
    let mut stats = TranscriptStats::default();

    while let Some(entry) = rx.blocking_recv() {
        stats.entries += 1;
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.append(&entry) {
                stats.failures += 1;
                warn!(%err, role = %entry.role, "could not record transcript entry");
            }
        }
    }

    for sink in sinks.iter_mut() {
        if let Err(err) = sink.flush() {
            stats.failures += 1;
            warn!(%err, "could not flush transcript");
        }
    }
    debug!(?stats, "transcript closed");
    stats
}
