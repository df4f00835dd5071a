//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SessionEvent;
use crate::grammar::Intent;
use crate::recognizer::ChannelCommand;
use crate::session::{SessionError, SessionSnapshot, TranscriptUpdate};

/// Largest accepted message body
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI and recognizer clients to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Begin a recording session
    StartRecording,

    /// Finalize the current recording now
    StopRecording,

    /// Return an idle session to a clean state
    Reset,

    /// Transcript update from an attached recognizer
    Transcript(TranscriptUpdate),

    /// Read one list
    GetList { intent: Intent },

    /// Delete one entry from a list
    RemoveEntry { intent: Intent, index: usize },

    /// Subscribe to session event notifications
    Subscribe,

    /// Register this connection as the speech recognizer
    AttachRecognizer,
}

/// Responses from daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Command accepted
    Accepted,

    /// Contents of one list
    List { intent: Intent, entries: Vec<String> },

    /// Entry deleted from a list
    Removed { intent: Intent, index: usize, entry: String },

    /// Subscription confirmed
    Subscribed,

    /// Recognizer registration confirmed
    RecognizerAttached,

    /// Error response
    Error { code: String, message: String },
}

impl From<&SessionError> for Response {
    fn from(err: &SessionError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Push notification from daemon to subscribed or attached clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "notification", rename_all = "snake_case")]
pub enum Notification {
    /// Session event occurred
    Event(SessionEvent),

    /// Start or stop request for an attached recognizer
    Channel { command: ChannelCommand },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current recording session
    pub session: SessionSnapshot,

    /// Number of recognizers currently attached
    pub recognizers_attached: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(session: SessionSnapshot, recognizers_attached: usize, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            session,
            recognizers_attached,
            uptime_secs,
        }
    }
}
