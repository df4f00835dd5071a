//! Transcript session state machine
//!
//! Handles one recording from start to a single classified entry:
//! Idle -> Recording -> Finalizing -> Done | Failed, then back to Idle via
//! `reset`. The first finalize trigger (manual stop, recognizer final,
//! error, timeout) is authoritative; every later trigger is a no-op.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::grammar::{CommandGrammar, Intent};
use crate::recognizer::{ChannelError, RecognitionChannel};
use crate::store::StoreError;

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Ready to start a recording
    Idle,
    /// Recognizer running, accepting transcript updates
    Recording,
    /// A finalize trigger fired, waiting for classification
    Finalizing,
    /// Classified entry produced
    Done,
    /// Nothing usable came out of the recording
    Failed,
}

impl Default for Status {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Idle => write!(f, "Idle"),
            Status::Recording => write!(f, "Recording"),
            Status::Finalizing => write!(f, "Finalizing"),
            Status::Done => write!(f, "Done"),
            Status::Failed => write!(f, "Failed"),
        }
    }
}

/// What ended the Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    ManualStop,
    RecognizerFinal,
    Error,
    Timeout,
}

impl std::fmt::Display for FinalizeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalizeReason::ManualStop => write!(f, "manual_stop"),
            FinalizeReason::RecognizerFinal => write!(f, "recognizer_final"),
            FinalizeReason::Error => write!(f, "error"),
            FinalizeReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// One result from the recognition stream
///
/// `text` is the recognizer's cumulative best transcription, so each
/// update replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptUpdate {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn last(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            is_final: false,
            error: Some(message.into()),
        }
    }
}

/// The classified result of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEntry {
    pub intent: Intent,
    pub text: String,
}

/// Identifies one armed timeout; stale tokens are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutToken(u64);

/// Outcome of feeding a trigger into the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Partial transcript recorded, still recording
    Updated,
    /// The session moved to Finalizing for this reason
    Finalizing(FinalizeReason),
    /// Arrived after finalization (or with a stale token) and was dropped
    Ignored,
}

/// Errors returned by session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a recording session is already active")]
    AlreadyActive,

    #[error("cannot {op} while {status}")]
    InvalidState { op: &'static str, status: Status },

    #[error(transparent)]
    RecognizerUnavailable(ChannelError),

    #[error("transcript is empty after removing the command phrase")]
    EmptyTranscript,

    #[error("recognizer error: {0}")]
    ChannelError(String),

    #[error("list store error: {0}")]
    Store(#[from] StoreError),

    #[error("session driver is not running")]
    DriverClosed,
}

impl SessionError {
    /// Stable identifier for IPC error responses
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyActive => "already_active",
            SessionError::InvalidState { .. } => "invalid_state",
            SessionError::RecognizerUnavailable(_) => "recognizer_unavailable",
            SessionError::EmptyTranscript => "empty_transcript",
            SessionError::ChannelError(_) => "channel_error",
            SessionError::Store(_) => "store_error",
            SessionError::DriverClosed => "driver_closed",
        }
    }
}

/// A single recording's state machine
pub struct TranscriptSession<C: RecognitionChannel> {
    channel: C,
    grammar: CommandGrammar,
    /// Intent used when no command phrase matches
    default_intent: Intent,
    status: Status,
    /// Last best transcription seen; overwritten, never appended
    latest_transcript: String,
    finalize_reason: Option<FinalizeReason>,
    channel_error: Option<String>,
    /// Whether this session currently holds the recognition channel
    channel_held: bool,
    armed: Option<TimeoutToken>,
    next_token: u64,
    started_at: Option<Instant>,
}

impl<C: RecognitionChannel> TranscriptSession<C> {
    /// Create an idle session using the built-in grammar
    pub fn new(channel: C) -> Self {
        Self::with_grammar(channel, CommandGrammar::default())
    }

    pub fn with_grammar(channel: C, grammar: CommandGrammar) -> Self {
        Self {
            channel,
            grammar,
            default_intent: Intent::default(),
            status: Status::Idle,
            latest_transcript: String::new(),
            finalize_reason: None,
            channel_error: None,
            channel_held: false,
            armed: None,
            next_token: 0,
            started_at: None,
        }
    }

    /// Set the intent used for transcripts without a command phrase
    pub fn with_default_intent(mut self, intent: Intent) -> Self {
        self.default_intent = intent;
        self
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Live transcript for display while recording
    pub fn current_transcript(&self) -> &str {
        &self.latest_transcript
    }

    pub fn finalize_reason(&self) -> Option<FinalizeReason> {
        self.finalize_reason
    }

    /// Message of the recognizer error that ended the session, if any
    pub fn channel_error(&self) -> Option<&str> {
        self.channel_error.as_deref()
    }

    /// The timeout currently armed, if recording
    pub fn armed_timeout(&self) -> Option<TimeoutToken> {
        self.armed
    }

    /// Start recording
    ///
    /// Acquires the recognition channel and arms a timeout. The caller is
    /// responsible for scheduling the returned token and delivering it to
    /// [`on_timeout`](Self::on_timeout) when it elapses.
    pub fn start(&mut self) -> Result<TimeoutToken, SessionError> {
        if self.status != Status::Idle {
            return Err(SessionError::AlreadyActive);
        }

        self.channel.request_start().map_err(|e| {
            warn!(error = %e, "recognizer refused to start");
            SessionError::RecognizerUnavailable(e)
        })?;
        self.channel_held = true;

        self.next_token += 1;
        let token = TimeoutToken(self.next_token);
        self.armed = Some(token);
        self.started_at = Some(Instant::now());

        self.transition_to(Status::Recording);
        Ok(token)
    }

    /// Feed one transcript update from the recognizer
    pub fn on_update(&mut self, update: TranscriptUpdate) -> Result<Trigger, SessionError> {
        match self.status {
            Status::Idle => Err(self.invalid("accept a transcript update")),
            Status::Recording => {
                let TranscriptUpdate {
                    text,
                    is_final,
                    error,
                } = update;

                // An error report without a result keeps the last transcript
                if error.is_none() || !text.is_empty() {
                    self.latest_transcript = text;
                }

                if let Some(message) = error {
                    warn!(error = %message, "recognizer reported an error");
                    self.channel_error = Some(message);
                    Ok(self.begin_finalizing(FinalizeReason::Error))
                } else if is_final {
                    Ok(self.begin_finalizing(FinalizeReason::RecognizerFinal))
                } else {
                    debug!(transcript = %self.latest_transcript, "partial transcript");
                    Ok(Trigger::Updated)
                }
            }
            status => {
                debug!(%status, "late transcript update ignored");
                Ok(Trigger::Ignored)
            }
        }
    }

    /// Stop recording at the user's request
    pub fn manual_stop(&mut self) -> Result<Trigger, SessionError> {
        match self.status {
            Status::Idle => Err(self.invalid("stop")),
            Status::Recording => Ok(self.begin_finalizing(FinalizeReason::ManualStop)),
            status => {
                debug!(%status, "stop after finalization ignored");
                Ok(Trigger::Ignored)
            }
        }
    }

    /// Deliver an elapsed timeout
    ///
    /// Only the currently armed token finalizes the session; a timeout that
    /// was cancelled or belongs to an earlier recording is dropped.
    pub fn on_timeout(&mut self, token: TimeoutToken) -> Trigger {
        if self.status == Status::Recording && self.armed == Some(token) {
            self.begin_finalizing(FinalizeReason::Timeout)
        } else {
            debug!(?token, status = %self.status, "stale timeout ignored");
            Trigger::Ignored
        }
    }

    /// Classify the finalized transcript
    ///
    /// Runs once per session: success moves to Done, an empty result moves
    /// to Failed.
    pub fn finalize(&mut self) -> Result<ClassifiedEntry, SessionError> {
        if self.status != Status::Finalizing {
            return Err(self.invalid("finalize"));
        }

        let (intent, text) = self.grammar.match_and_strip(&self.latest_transcript);
        let text = text.trim();

        if text.is_empty() {
            let error = match (self.finalize_reason, &self.channel_error) {
                (Some(FinalizeReason::Error), Some(message)) => {
                    SessionError::ChannelError(message.clone())
                }
                _ => SessionError::EmptyTranscript,
            };
            warn!(
                reason = ?self.finalize_reason,
                transcript = %self.latest_transcript,
                %error,
                "nothing to file"
            );
            self.transition_to(Status::Failed);
            return Err(error);
        }

        let entry = ClassifiedEntry {
            intent: intent.unwrap_or(self.default_intent),
            text: text.to_string(),
        };
        info!(
            intent = %entry.intent,
            matched_command = intent.is_some(),
            "transcript classified"
        );
        self.transition_to(Status::Done);
        Ok(entry)
    }

    /// Return to Idle after Done or Failed
    pub fn reset(&mut self) -> Result<(), SessionError> {
        match self.status {
            Status::Idle => Ok(()),
            Status::Done | Status::Failed => {
                self.latest_transcript.clear();
                self.finalize_reason = None;
                self.channel_error = None;
                self.started_at = None;
                self.transition_to(Status::Idle);
                Ok(())
            }
            Status::Recording | Status::Finalizing => Err(self.invalid("reset")),
        }
    }

    fn begin_finalizing(&mut self, reason: FinalizeReason) -> Trigger {
        self.armed = None;
        self.release_channel();
        self.finalize_reason = Some(reason);

        let duration_ms = self
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        info!(%reason, duration_ms, "recording finished");

        self.transition_to(Status::Finalizing);
        Trigger::Finalizing(reason)
    }

    fn release_channel(&mut self) {
        if self.channel_held {
            self.channel_held = false;
            self.channel.request_stop();
        }
    }

    fn transition_to(&mut self, new_status: Status) {
        info!(from = %self.status, to = %new_status, "session transition");
        self.status = new_status;
    }

    fn invalid(&self, op: &'static str) -> SessionError {
        SessionError::InvalidState {
            op,
            status: self.status,
        }
    }
}

impl<C: RecognitionChannel> Drop for TranscriptSession<C> {
    fn drop(&mut self) {
        self.release_channel();
    }
}
