//! Session driver: the single owner of the transcript session
//!
//! Every finalize trigger (client stop, recognizer updates, elapsed
//! timeouts) arrives as a [`SessionCommand`] on one queue, so only the first
//! of them can observe the Recording state. Once a session finalizes, the
//! driver classifies it, appends the entry to its list and resets to Idle.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::grammar::Intent;
use crate::recognizer::RecognitionChannel;
use crate::store::ListStore;

use super::machine::{
    ClassifiedEntry, FinalizeReason, SessionError, Status, TimeoutToken, TranscriptSession,
    TranscriptUpdate, Trigger,
};
use super::timeout::TimeoutTimer;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Commands processed by the driver, in arrival order
#[derive(Debug)]
pub enum SessionCommand {
    Start { reply: Reply<()> },
    Stop { reply: Reply<()> },
    Update { update: TranscriptUpdate, reply: Reply<()> },
    Reset { reply: Reply<()> },
    TimeoutElapsed(TimeoutToken),
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
    ListEntries { intent: Intent, reply: Reply<Vec<String>> },
    RemoveEntry { intent: Intent, index: usize, reply: Reply<String> },
}

/// Point-in-time view of the driver for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: Status,
    pub transcript: String,
    pub finalize_reason: Option<FinalizeReason>,
    /// Entry filed by the most recent session, if it succeeded
    pub last_entry: Option<ClassifiedEntry>,
    /// Error code of the most recent session, if it failed
    pub last_error: Option<String>,
}

/// Driver behaviour knobs
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// How long a recording may run before it is finalized automatically
    pub timeout: Duration,
    /// Start the next recording as soon as an entry is saved
    pub chain_recording: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            chain_recording: false,
        }
    }
}

pub struct SessionDriver<C: RecognitionChannel, S: ListStore> {
    session: TranscriptSession<C>,
    store: S,
    options: DriverOptions,
    timer: TimeoutTimer,
    /// Weak so the queue closes once every client is gone
    command_tx: mpsc::WeakSender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    last_entry: Option<ClassifiedEntry>,
    last_error: Option<String>,
}

impl<C: RecognitionChannel, S: ListStore> SessionDriver<C, S> {
    pub fn new(
        session: TranscriptSession<C>,
        store: S,
        options: DriverOptions,
        client: &SessionClient,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            session,
            store,
            options,
            timer: TimeoutTimer::new(),
            command_tx: client.tx.downgrade(),
            event_tx,
            last_entry: None,
            last_error: None,
        }
    }

    /// Process commands until every client has been dropped
    pub async fn run(&mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!(
            timeout_ms = self.options.timeout.as_millis() as u64,
            chain = self.options.chain_recording,
            "session driver started"
        );

        while let Some(command) = command_rx.recv().await {
            self.handle(command);
        }

        self.timer.cancel();
        info!("session driver stopped");
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { reply } => {
                let _ = reply.send(self.start());
            }
            SessionCommand::Stop { reply } => {
                let result = self.session.manual_stop().map(|t| self.after_trigger(t));
                let _ = reply.send(result);
            }
            SessionCommand::Update { update, reply } => {
                let result = self.session.on_update(update).map(|t| self.after_trigger(t));
                let _ = reply.send(result);
            }
            SessionCommand::TimeoutElapsed(token) => {
                let trigger = self.session.on_timeout(token);
                self.after_trigger(trigger);
            }
            SessionCommand::Reset { reply } => {
                let was_idle = self.session.status() == Status::Idle;
                let result = self.session.reset();
                if result.is_ok() && !was_idle {
                    self.emit(SessionEvent::SessionReset);
                }
                let _ = reply.send(result);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::ListEntries { intent, reply } => {
                let result = self.store.get(intent.list_name()).map_err(SessionError::from);
                let _ = reply.send(result);
            }
            SessionCommand::RemoveEntry {
                intent,
                index,
                reply,
            } => {
                let result = self
                    .store
                    .remove(intent.list_name(), index)
                    .map_err(SessionError::from);
                if let Ok(entry) = &result {
                    info!(list = intent.list_name(), index, entry = %entry, "entry removed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.session.status(),
            transcript: self.session.current_transcript().to_string(),
            finalize_reason: self.session.finalize_reason(),
            last_entry: self.last_entry.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn start(&mut self) -> Result<(), SessionError> {
        let token = self.session.start()?;
        if let Some(tx) = self.command_tx.upgrade() {
            self.timer.arm(self.options.timeout, token, tx);
        }
        self.last_entry = None;
        self.last_error = None;
        self.emit(SessionEvent::RecordingStarted);
        Ok(())
    }

    fn after_trigger(&mut self, trigger: Trigger) {
        match trigger {
            Trigger::Updated => self.emit(SessionEvent::TranscriptUpdated {
                text: self.session.current_transcript().to_string(),
            }),
            Trigger::Finalizing(reason) => {
                self.timer.cancel();
                self.emit(SessionEvent::Finalizing { reason });
                self.complete();
            }
            Trigger::Ignored => {}
        }
    }

    /// Classify, persist and reset the finalized session
    fn complete(&mut self) {
        let reason = self.session.finalize_reason();
        let saved = match self.classify_and_save() {
            Ok(entry) => {
                info!(
                    list = entry.intent.list_name(),
                    ?reason,
                    "entry saved"
                );
                self.emit(SessionEvent::EntrySaved {
                    intent: entry.intent,
                    text: entry.text.clone(),
                });
                self.last_entry = Some(entry);
                true
            }
            Err(e) => {
                warn!(error = %e, ?reason, "session produced no entry");
                self.last_error = Some(e.code().to_string());
                self.emit(SessionEvent::SessionFailed {
                    reason,
                    error: e.code().to_string(),
                });
                false
            }
        };

        if let Err(e) = self.session.reset() {
            error!(error = %e, "failed to reset finalized session");
            return;
        }
        self.emit(SessionEvent::SessionReset);

        if saved && self.options.chain_recording {
            if let Err(e) = self.start() {
                warn!(error = %e, "could not chain next recording");
            }
        }
    }

    fn classify_and_save(&mut self) -> Result<ClassifiedEntry, SessionError> {
        let entry = self.session.finalize()?;
        self.store.append(entry.intent.list_name(), &entry.text)?;
        Ok(entry)
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }
}

/// Cloneable handle for sending commands to a [`SessionDriver`]
#[derive(Clone)]
pub struct SessionClient {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionClient {
    /// Create a client and the command queue its driver will consume
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| SessionError::DriverClosed)?;
        reply_rx.await.map_err(|_| SessionError::DriverClosed)
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Stop { reply }).await?
    }

    pub async fn push_update(&self, update: TranscriptUpdate) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Update { update, reply })
            .await?
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Reset { reply }).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn list(&self, intent: Intent) -> Result<Vec<String>, SessionError> {
        self.request(|reply| SessionCommand::ListEntries { intent, reply })
            .await?
    }

    pub async fn remove(&self, intent: Intent, index: usize) -> Result<String, SessionError> {
        self.request(|reply| SessionCommand::RemoveEntry {
            intent,
            index,
            reply,
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::recognizer::ChannelError;
    use crate::store::{MemoryListStore, StoreError};

    #[derive(Clone, Default)]
    struct CountingChannel {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    impl RecognitionChannel for CountingChannel {
        fn request_start(&mut self) -> Result<(), ChannelError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn request_stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ReadOnlyStore;

    impl ListStore for ReadOnlyStore {
        fn get(&self, _list: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }

        fn append(&mut self, _list: &str, _entry: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn remove(&mut self, list: &str, index: usize) -> Result<String, StoreError> {
            Err(StoreError::IndexOutOfRange {
                list: list.to_string(),
                index,
                len: 0,
            })
        }
    }

    fn spawn_driver<S: ListStore + 'static>(
        store: S,
        options: DriverOptions,
    ) -> (SessionClient, broadcast::Receiver<SessionEvent>, CountingChannel) {
        let channel = CountingChannel::default();
        let (event_tx, event_rx) = broadcast::channel(64);
        let (client, command_rx) = SessionClient::channel(16);
        let mut driver = SessionDriver::new(
            TranscriptSession::new(channel.clone()),
            store,
            options,
            &client,
            event_tx,
        );
        tokio::spawn(async move { driver.run(command_rx).await });
        (client, event_rx, channel)
    }

    #[tokio::test]
    async fn test_final_update_files_entry() {
        let (client, mut events, _) = spawn_driver(MemoryListStore::new(), DriverOptions::default());

        client.start().await.unwrap();
        client
            .push_update(TranscriptUpdate::partial("remind me"))
            .await
            .unwrap();
        client
            .push_update(TranscriptUpdate::last("remind me to call mom"))
            .await
            .unwrap();

        assert_eq!(client.list(Intent::Reminder).await.unwrap(), vec!["call mom"]);
        assert!(client.list(Intent::Note).await.unwrap().is_empty());

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(
            snapshot.last_entry,
            Some(ClassifiedEntry {
                intent: Intent::Reminder,
                text: "call mom".to_string()
            })
        );

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                SessionEvent::RecordingStarted,
                SessionEvent::TranscriptUpdated {
                    text: "remind me".to_string()
                },
                SessionEvent::Finalizing {
                    reason: FinalizeReason::RecognizerFinal
                },
                SessionEvent::EntrySaved {
                    intent: Intent::Reminder,
                    text: "call mom".to_string()
                },
                SessionEvent::SessionReset,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_finalizes_recording() {
        let options = DriverOptions {
            timeout: Duration::from_secs(5),
            ..DriverOptions::default()
        };
        let (client, _events, channel) = spawn_driver(MemoryListStore::new(), options);

        client.start().await.unwrap();
        client
            .push_update(TranscriptUpdate::partial("note to buy eggs"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(client.list(Intent::Note).await.unwrap(), vec!["buy eggs"]);
        assert_eq!(channel.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_timeout() {
        let (client, mut events, _) = spawn_driver(MemoryListStore::new(), DriverOptions::default());

        client.start().await.unwrap();
        client.stop().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.last_error.as_deref(), Some("empty_transcript"));

        let failures = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, SessionEvent::SessionFailed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_chained_recording_restarts() {
        let options = DriverOptions {
            chain_recording: true,
            ..DriverOptions::default()
        };
        let (client, _events, channel) = spawn_driver(MemoryListStore::new(), options);

        client.start().await.unwrap();
        client
            .push_update(TranscriptUpdate::last("note first"))
            .await
            .unwrap();
        assert_eq!(client.snapshot().await.unwrap().status, Status::Recording);

        client
            .push_update(TranscriptUpdate::last("note second"))
            .await
            .unwrap();
        assert_eq!(
            client.list(Intent::Note).await.unwrap(),
            vec!["first", "second"]
        );
        assert_eq!(channel.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_session_does_not_chain() {
        let options = DriverOptions {
            chain_recording: true,
            ..DriverOptions::default()
        };
        let (client, _events, _) = spawn_driver(MemoryListStore::new(), options);

        client.start().await.unwrap();
        client
            .push_update(TranscriptUpdate::last("remind me to"))
            .await
            .unwrap();
        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(snapshot.last_error.as_deref(), Some("empty_transcript"));
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let (client, _events, _) = spawn_driver(ReadOnlyStore, DriverOptions::default());

        client.start().await.unwrap();
        client.push_update(TranscriptUpdate::last("note hi")).await.unwrap();

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.status, Status::Idle);
        assert_eq!(snapshot.last_error.as_deref(), Some("store_error"));
        assert!(matches!(
            client.remove(Intent::Note, 0).await,
            Err(SessionError::Store(StoreError::IndexOutOfRange { .. }))
        ));
    }

    #[tokio::test]
    async fn test_commands_in_wrong_state() {
        let (client, _events, _) = spawn_driver(MemoryListStore::new(), DriverOptions::default());

        assert!(matches!(
            client.push_update(TranscriptUpdate::partial("x")).await,
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            client.stop().await,
            Err(SessionError::InvalidState { .. })
        ));
        client.reset().await.unwrap();

        client.start().await.unwrap();
        assert!(matches!(client.start().await, Err(SessionError::AlreadyActive)));
        assert!(matches!(
            client.reset().await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_driver() {
        let (client, rx) = SessionClient::channel(1);
        drop(rx);
        assert!(matches!(client.start().await, Err(SessionError::DriverClosed)));
    }
}
