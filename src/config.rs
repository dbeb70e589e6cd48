//! Runtime configuration for a session.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::warn;

use crate::message::{Role, DEFAULT_MAX_LINE_LENGTH};
use crate::transcript::{HtmlFileSink, LogFileSink, TranscriptSink};

/// Port used when the operator gives none.
pub const DEFAULT_PORT: u16 = 7;

/// How long a connector waits for the listener to answer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub role: Role,
    /// Address to bind (listener) or dial (connector).
    pub addr: String,
    pub connect_timeout: Duration,
    pub max_line_length: usize,
    pub transcript: TranscriptConfig,
}

impl ChatConfig {
    pub fn listener(addr: impl Into<String>) -> ChatConfig {
        ChatConfig {
            role: Role::Listener,
            addr: addr.into(),
            ..ChatConfig::default()
        }
    }

    pub fn connector(addr: impl Into<String>) -> ChatConfig {
        ChatConfig {
            role: Role::Connector,
            addr: addr.into(),
            ..ChatConfig::default()
        }
    }
}

impl Default for ChatConfig {
    fn default() -> ChatConfig {
        ChatConfig {
            role: Role::Connector,
            addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            transcript: TranscriptConfig::default(),
        }
    }
}

/// Where, if anywhere, to keep a transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptConfig {
    pub log_path: Option<PathBuf>,
    pub html_path: Option<PathBuf>,
    /// Page title, defaults to the local role's name.
    pub html_title: Option<String>,
}

impl TranscriptConfig {
    /// Opens every configured sink. A sink that cannot be opened is skipped with a warning, chat
    /// works without it.
    pub fn open_sinks(&self, role: Role, started: DateTime<Local>) -> Vec<Box<dyn TranscriptSink>> {
        let mut sinks: Vec<Box<dyn TranscriptSink>> = Vec::new();

        if let Some(path) = &self.log_path {
            match LogFileSink::open(path, started) {
                Ok(sink) => sinks.push(Box::new(sink)),
                Err(err) => warn!(%err, path = %path.display(), "transcript log disabled"),
            }
        }
        if let Some(path) = &self.html_path {
            let title = self
                .html_title
                .clone()
                .unwrap_or_else(|| format!("{} Chat", role));
            match HtmlFileSink::open(path, &title) {
                Ok(sink) => sinks.push(Box::new(sink)),
                Err(err) => warn!(%err, path = %path.display(), "html transcript disabled"),
            }
        }
        sinks
    }
}
