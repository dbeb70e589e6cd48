//! duplex-chat binary.
//!
//! # Usage
//!
//! ```bash
//! # One terminal: wait for a peer on the default port
//! duplex-chat listen --log chat.log
//!
//! # Another terminal: connect to it
//! duplex-chat connect --addr 127.0.0.1:7 --html client.html
//! ```
//!
//! Type lines to chat, `exit` to leave.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use duplex_chat::config::{ChatConfig, TranscriptConfig, DEFAULT_CONNECT_TIMEOUT};
use duplex_chat::message::DEFAULT_MAX_LINE_LENGTH;
use duplex_chat::session;
use duplex_chat::terminal::{self, Console};
use futures::channel::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Two-peer terminal chat over TCP
#[derive(Parser, Debug)]
#[command(name = "duplex-chat")]
#[command(about = "Chat line by line with one peer over a TCP connection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error). Logs go to stderr.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for one peer to connect, then chat
    Listen {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:7")]
        bind: String,

        #[command(flatten)]
        chat: ChatArgs,
    },

    /// Connect to a listening peer, then chat
    Connect {
        /// Address of the listening peer
        #[arg(short, long, default_value = "127.0.0.1:7")]
        addr: String,

        /// Seconds to wait for the peer to answer
        #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
        connect_timeout: u64,

        #[command(flatten)]
        chat: ChatArgs,
    },

    /// Print the addresses a host name resolves to
    Resolve {
        /// Host name to look up
        host: String,
    },
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Append the conversation to this text file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Keep an HTML page of the conversation at this path
    #[arg(long)]
    html: Option<PathBuf>,

    /// Longest line accepted in either direction, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LENGTH)]
    max_line_length: usize,
}

impl ChatArgs {
    fn apply(self, config: ChatConfig) -> ChatConfig {
        ChatConfig {
            max_line_length: self.max_line_length,
            transcript: TranscriptConfig {
                log_path: self.log,
                html_path: self.html,
                html_title: None,
            },
            ..config
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // stdout belongs to the chat.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = match cli.command {
        Command::Resolve { host } => return resolve(&host).await,
        Command::Listen { bind, chat } => chat.apply(ChatConfig::listener(bind)),
        Command::Connect {
            addr,
            connect_timeout,
            chat,
        } => ChatConfig {
            connect_timeout: Duration::from_secs(connect_timeout),
            ..chat.apply(ChatConfig::connector(addr))
        },
    };

    let (events_tx, events_rx) = mpsc::unbounded();
    let console = tokio::spawn(Console::stdout().run(events_rx));

    let result = session::start(&config, terminal::stdin_lines(), events_tx).await;
    if let Err(err) = console.await? {
        tracing::warn!(%err, "could not write to the console");
    }

    match result {
        Ok(report) if report.is_clean() => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(err) => {
            eprintln!("{}Could not establish the connection: {}", terminal::PROMPT, err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn resolve(host: &str) -> Result<ExitCode, Box<dyn Error>> {
    let mut found = false;
    for addr in tokio::net::lookup_host((host, 0)).await? {
        found = true;
        println!("System Name: {}", host);
        println!("System IP-Address: {}", addr.ip());
    }
    if !found {
        eprintln!("No address found for {}", host);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
