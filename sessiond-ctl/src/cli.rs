//! CLI argument parsing for sessiond-ctl

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Control client for sessiond
#[derive(Parser, Debug)]
#[command(name = "sessiond-ctl")]
#[command(about = "Talk to a running sessiond over its Unix socket")]
#[command(version)]
pub struct Cli {
    /// Daemon socket path
    #[arg(long, env = "SESSIOND_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Print JSON results instead of the short form
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the daemon answers
    Ping,

    /// Create a session, or report the existing one
    Create {
        /// Session id
        session_id: String,

        /// Working directory for the shell
        #[arg(short = 'c', long, default_value = "")]
        cwd: String,
    },

    /// Write input to a session
    Send {
        session_id: String,

        /// Text to send; `\n` is not appended
        data: String,

        /// Lease holder to write as
        #[arg(long, default_value = "")]
        owner: String,

        /// Append a carriage return
        #[arg(short = 'r', long)]
        enter: bool,
    },

    /// Resize a session's terminal
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },

    /// Stop a session
    Stop { session_id: String },

    /// Print raw output since an offset
    Backlog {
        session_id: String,

        #[arg(long, default_value_t = 0)]
        since: i64,
    },

    /// Print the rendered screen
    Snapshot { session_id: String },

    /// Print the attach bootstrap payload
    Bootstrap { session_id: String },

    /// Return stream credit
    Ack {
        session_id: String,
        stream_id: String,
        bytes: i64,
    },

    /// List sessions
    #[command(alias = "ls")]
    List,

    /// Show the daemon executable and its hash
    Info,

    /// Take, refresh or release (empty owner) the write lease
    SetOwner {
        session_id: String,

        #[arg(default_value = "")]
        owner: String,
    },

    /// Show the current lease holder
    GetOwner { session_id: String },

    /// Stream a session's output to stdout
    Attach {
        session_id: String,

        /// Reuse a stream id (default: generated)
        #[arg(long, default_value = "")]
        stream_id: String,

        /// Backlog offset to replay from
        #[arg(long, default_value_t = 0)]
        since: i64,

        /// Skip the bootstrap replay
        #[arg(long)]
        no_buffer: bool,
    },

    /// Ask the daemon to exit
    Shutdown {
        #[arg(long, default_value = "")]
        reason: String,
    },
}
