//! Bridge to the external speech recognizer
//!
//! The session only needs to ask the recognizer to start and stop; the
//! transcript updates themselves come back through the session driver.
//! The daemon's implementation broadcasts start/stop commands to
//! recognizer processes attached over IPC.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Errors reported by a recognition channel when asked to start
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("speech recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("speech recognizer is already in use")]
    Busy,
}

/// The audio/recognition channel a session drives
pub trait RecognitionChannel: Send {
    /// Ask the recognizer to begin streaming transcript updates
    fn request_start(&mut self) -> Result<(), ChannelError>;

    /// Ask the recognizer to stop; called at most once per successful start
    fn request_stop(&mut self);
}

impl<C: RecognitionChannel + ?Sized> RecognitionChannel for Box<C> {
    fn request_start(&mut self) -> Result<(), ChannelError> {
        (**self).request_start()
    }

    fn request_stop(&mut self) {
        (**self).request_stop()
    }
}

/// Commands pushed to attached recognizer processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCommand {
    Start,
    Stop,
}

struct Shared {
    attached: AtomicUsize,
    held: AtomicBool,
    command_tx: broadcast::Sender<ChannelCommand>,
}

/// Recognition channel backed by a broadcast of [`ChannelCommand`]s
///
/// Starting fails while no recognizer is attached, and while another
/// session still holds the channel.
#[derive(Clone)]
pub struct BroadcastRecognizer {
    shared: Arc<Shared>,
}

impl BroadcastRecognizer {
    pub fn new() -> Self {
        let (command_tx, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                attached: AtomicUsize::new(0),
                held: AtomicBool::new(false),
                command_tx,
            }),
        }
    }

    /// Register a recognizer; it stays attached until the handle is dropped
    pub fn attach(&self) -> RecognizerAttachment {
        let rx = self.shared.command_tx.subscribe();
        let count = self.shared.attached.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attached = count, "recognizer attached");
        RecognizerAttachment {
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of currently attached recognizers
    pub fn attached(&self) -> usize {
        self.shared.attached.load(Ordering::SeqCst)
    }

    /// Whether a session currently holds the channel
    pub fn is_held(&self) -> bool {
        self.shared.held.load(Ordering::SeqCst)
    }
}

impl Default for BroadcastRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionChannel for BroadcastRecognizer {
    fn request_start(&mut self) -> Result<(), ChannelError> {
        if self.attached() == 0 {
            return Err(ChannelError::Unavailable("no recognizer attached".to_string()));
        }
        if self.shared.held.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::Busy);
        }

        if self.shared.command_tx.send(ChannelCommand::Start).is_err() {
            self.shared.held.store(false, Ordering::SeqCst);
            return Err(ChannelError::Unavailable(
                "recognizer detached before start".to_string(),
            ));
        }

        debug!("recognizer start requested");
        Ok(())
    }

    fn request_stop(&mut self) {
        if !self.shared.held.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.shared.command_tx.send(ChannelCommand::Stop).is_err() {
            warn!("no recognizer listening for stop");
        } else {
            debug!("recognizer stop requested");
        }
    }
}

/// An attached recognizer's command feed
pub struct RecognizerAttachment {
    rx: broadcast::Receiver<ChannelCommand>,
    shared: Arc<Shared>,
}

impl RecognizerAttachment {
    /// Wait for the next start/stop command
    pub async fn recv(&mut self) -> Result<ChannelCommand, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for RecognizerAttachment {
    fn drop(&mut self) {
        let count = self.shared.attached.fetch_sub(1, Ordering::SeqCst) - 1;
        info!(attached = count, "recognizer detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_without_recognizer_is_unavailable() {
        let mut channel = BroadcastRecognizer::new();
        assert!(matches!(
            channel.request_start(),
            Err(ChannelError::Unavailable(_))
        ));
        assert!(!channel.is_held());
    }

    #[tokio::test]
    async fn test_start_and_stop_reach_recognizer() {
        let mut channel = BroadcastRecognizer::new();
        let mut attachment = channel.attach();

        channel.request_start().unwrap();
        assert!(channel.is_held());
        assert_eq!(attachment.recv().await.unwrap(), ChannelCommand::Start);

        channel.request_stop();
        assert!(!channel.is_held());
        assert_eq!(attachment.recv().await.unwrap(), ChannelCommand::Stop);
    }

    #[test]
    fn test_channel_is_exclusive() {
        let mut first = BroadcastRecognizer::new();
        let mut second = first.clone();
        let _attachment = first.attach();

        first.request_start().unwrap();
        assert_eq!(second.request_start(), Err(ChannelError::Busy));

        first.request_stop();
        assert!(second.request_start().is_ok());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut channel = BroadcastRecognizer::new();
        let _attachment = channel.attach();
        channel.request_stop();
        assert!(!channel.is_held());
    }

    #[test]
    fn test_detach_on_drop() {
        let channel = BroadcastRecognizer::new();
        let attachment = channel.attach();
        assert_eq!(channel.attached(), 1);
        drop(attachment);
        assert_eq!(channel.attached(), 0);
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&ChannelCommand::Start).unwrap();
        assert_eq!(json, "\"start\"");
    }
}
