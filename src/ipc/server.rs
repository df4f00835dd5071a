//! Unix domain socket server for IPC
//!
//! Provides request-response communication, push notifications of session
//! events to subscribed clients, and start/stop commands to the attached
//! speech recognizer.

use std::future::pending;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::recognizer::{BroadcastRecognizer, ChannelCommand, RecognizerAttachment};
use crate::session::{SessionClient, SessionError};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared by all client handlers
struct Shared {
    client: SessionClient,
    recognizer: BroadcastRecognizer,
    event_tx: broadcast::Sender<SessionEvent>,
    start_time: Instant,
}

/// Per-connection role change requested by a client
enum ClientAction {
    Subscribe,
    AttachRecognizer,
}

/// Aborts the wrapped task when the owning handler goes away
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        client: SessionClient,
        recognizer: BroadcastRecognizer,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared: Arc::new(Shared {
                client,
                recognizer,
                event_tx,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(Self::serve_client(stream, shared, shutdown_rx));
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Run one client handler until it finishes or the server shuts down
    async fn serve_client(
        stream: UnixStream,
        shared: Arc<Shared>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tokio::select! {
            result = Self::handle_client(stream, shared) => {
                if let Err(e) = result {
                    warn!(?e, "client handler error");
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("client handler shutting down");
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so pushing notifications never
        // interrupts a half-read request. The guard stops it however this
        // handler exits.
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(8);
        let _reader_task = AbortOnDrop(tokio::spawn(read_frames(reader, frame_tx)));

        let mut events: Option<broadcast::Receiver<SessionEvent>> = None;
        let mut attachment: Option<RecognizerAttachment> = None;

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("client disconnected");
                        break Ok(());
                    };

                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, action) =
                                Self::process_request(request, &shared, attachment.is_some()).await;
                            match action {
                                Some(ClientAction::Subscribe) => {
                                    events = Some(shared.event_tx.subscribe());
                                    debug!("client subscribed to notifications");
                                }
                                Some(ClientAction::AttachRecognizer) => {
                                    if attachment.is_none() {
                                        attachment = Some(shared.recognizer.attach());
                                    }
                                }
                                None => {}
                            }
                            response
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed request");
                            Response::Error {
                                code: "bad_request".to_string(),
                                message: e.to_string(),
                            }
                        }
                    };

                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = send_message(&mut writer, &Notification::Event(event)).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged behind session events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }

                command = next_command(&mut attachment) => {
                    match command {
                        Ok(command) => {
                            debug!(?command, "forwarding command to recognizer");
                            if let Err(e) = send_message(&mut writer, &Notification::Channel { command }).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "recognizer lagged behind channel commands");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            attachment = None;
                        }
                    }
                }
            }
        }
    }

    /// Process a request and return a response
    /// Returns (Response, connection role change)
    async fn process_request(
        request: Request,
        shared: &Shared,
        is_recognizer: bool,
    ) -> (Response, Option<ClientAction>) {
        let client = &shared.client;
        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match client.snapshot().await {
                Ok(session) => Response::Status(DaemonStatus::new(
                    session,
                    shared.recognizer.attached(),
                    shared.start_time.elapsed().as_secs(),
                )),
                Err(e) => Response::from(&e),
            },

            Request::StartRecording => accepted(client.start().await),
            Request::StopRecording => accepted(client.stop().await),
            Request::Reset => accepted(client.reset().await),
            Request::Transcript(_) if !is_recognizer => {
                warn!("transcript update from a connection that is not the recognizer");
                Response::Error {
                    code: "not_recognizer".to_string(),
                    message: "transcript updates require attach_recognizer first".to_string(),
                }
            }
            Request::Transcript(update) => accepted(client.push_update(update).await),

            Request::GetList { intent } => match client.list(intent).await {
                Ok(entries) => Response::List { intent, entries },
                Err(e) => Response::from(&e),
            },

            Request::RemoveEntry { intent, index } => match client.remove(intent, index).await {
                Ok(entry) => Response::Removed {
                    intent,
                    index,
                    entry,
                },
                Err(e) => Response::from(&e),
            },

            Request::Subscribe => return (Response::Subscribed, Some(ClientAction::Subscribe)),

            Request::AttachRecognizer => {
                return (
                    Response::RecognizerAttached,
                    Some(ClientAction::AttachRecognizer),
                )
            }
        };

        (response, None)
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn accepted(result: Result<(), SessionError>) -> Response {
    match result {
        Ok(()) => Response::Accepted,
        Err(e) => {
            debug!(error = %e, "request rejected");
            Response::from(&e)
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_command(
    attachment: &mut Option<RecognizerAttachment>,
) -> Result<ChannelCommand, broadcast::error::RecvError> {
    match attachment {
        Some(attachment) => attachment.recv().await,
        None => pending().await,
    }
}

/// Read length-prefixed frames until EOF, an error or an oversized message
async fn read_frames<R: AsyncRead + Unpin>(mut reader: R, frame_tx: mpsc::Sender<Vec<u8>>) {
    let mut len_buf = [0u8; 4];

    loop {
        // Read message length (4-byte little-endian)
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
            Err(e) => {
                warn!(?e, "failed to read from client");
                return;
            }
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            warn!(len, "message too large, disconnecting");
            return;
        }

        // Read message body
        let mut msg_buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut msg_buf).await {
            warn!(?e, "truncated message from client");
            return;
        }

        if frame_tx.send(msg_buf).await.is_err() {
            return;
        }
    }
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
