//! Telnet client for a DX cluster node.
//!
//! This module handles the TCP connection to the cluster, the interactive
//! login, and the conversion of the raw byte stream into lines. Reconnecting
//! is not its job: a failed or dropped connection is reported and the
//! [`crate::worker::Worker`] decides what to do next.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout};
use tracing::{debug, error, info, warn};

use crate::state::LinkFlag;

/// Default DX cluster node.
pub const DEFAULT_HOST: &str = "g4bfg.net";

/// Default DX cluster telnet port.
pub const DEFAULT_PORT: u16 = 7300;

/// Prompt fragments that mean the node is waiting for a callsign.
const LOGIN_PROMPTS: &[&str] = &["login:", "call:", "please enter your call"];

const READ_BUFFER_SIZE: usize = 4096;

/// Longest partial line kept while waiting for its line feed.
const MAX_PENDING_LINE: usize = 8 * 1024;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// How long the courtesy `bye` may take before it is abandoned.
const BYE_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the cluster client.
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    /// Hostname of the cluster node.
    pub host: String,

    /// Port number.
    pub port: u16,

    /// Callsign to send at the login prompt.
    pub callsign: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// How long to wait for a login prompt before streaming anyway.
    pub login_timeout: Duration,

    /// End the connection when nothing arrives for this long.
    pub read_timeout: Option<Duration>,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            callsign: "N0CALL".to_string(),
            connect_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(10),
            read_timeout: None,
        }
    }
}

impl ClusterClientConfig {
    /// Create a new configuration with the given callsign.
    pub fn with_callsign(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            ..Default::default()
        }
    }

    /// Set the host and port.
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }
}

/// Errors that end a connection attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed during login")]
    ClosedDuringLogin,

    #[error("I/O error during login: {0}")]
    Io(#[from] io::Error),

    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// Events from the cluster client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// Login finished and lines will follow.
    Connected,

    /// A non-blank line was received.
    Line(String),

    /// A read failed. A `Disconnected` event always follows.
    Error(String),

    /// The connection ended. Sent exactly once per connection, after every line.
    Disconnected(String),
}

/// Where the client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    LoggingIn,
    Streaming,
    Disconnected,
}

/// What the login handshake should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStep {
    /// Keep reading.
    AwaitPrompt,
    /// A prompt was seen: send the callsign and start streaming.
    SendCallsign,
    /// No prompt arrived in time: start streaming without sending anything.
    ProceedWithoutPrompt,
}

/// Check the text received so far for a login prompt, ignoring case.
pub fn contains_login_prompt(received: &str) -> bool {
    let lower = received.to_ascii_lowercase();
    LOGIN_PROMPTS.iter().any(|prompt| lower.contains(prompt))
}

/// Decide the next login step from everything received and the time spent.
///
/// A prompt wins even if it shows up right at the deadline.
pub fn login_step(received: &str, elapsed: Duration, login_timeout: Duration) -> LoginStep {
    if contains_login_prompt(received) {
        LoginStep::SendCallsign
    } else if elapsed >= login_timeout {
        LoginStep::ProceedWithoutPrompt
    } else {
        LoginStep::AwaitPrompt
    }
}

/// Map a byte to its US-ASCII character, `?` for anything else.
fn ascii_char(byte: u8) -> char {
    if byte.is_ascii() { byte as char } else { '?' }
}

/// Splits a byte stream into lines.
///
/// Complete lines are returned without their `\n` or `\r\n`; blank lines are
/// dropped. The trailing partial line is kept for the next chunk.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend(bytes.iter().copied().map(ascii_char));

        let lines = match self.pending.rfind('\n') {
            Some(last) => {
                let complete: String = self.pending.drain(..=last).collect();
                complete
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(str::to_string)
                    .collect()
            }
            None => Vec::new(),
        };

        if self.pending.len() > MAX_PENDING_LINE {
            warn!(
                "Discarding {} bytes received without a line break",
                self.pending.len()
            );
            self.pending.clear();
        }

        lines
    }

    /// The partial line waiting for its line feed.
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Resolve once shutdown has been requested or the sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Resources of one live connection.
struct Session {
    writer: OwnedWriteHalf,
    cancel: watch::Sender<bool>,
}

/// Async DX cluster telnet client.
pub struct ClusterClient {
    config: ClusterClientConfig,
    connected: LinkFlag,
    state: ClientState,
    session: Option<Session>,
}

impl ClusterClient {
    /// Create a new cluster client with the given configuration.
    pub fn new(config: ClusterClientConfig) -> Self {
        Self {
            config,
            connected: LinkFlag::new(),
            state: ClientState::Idle,
            session: None,
        }
    }

    /// Whether a logged-in connection is currently streaming.
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// A handle on the connected flag for other tasks to read.
    pub fn connection_flag(&self) -> LinkFlag {
        self.connected.clone()
    }

    pub fn state(&self) -> ClientState {
        if self.state == ClientState::Streaming && !self.connected.get() {
            ClientState::Disconnected
        } else {
            self.state
        }
    }

    fn transition(&mut self, next: ClientState) {
        debug!("Cluster client state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Connect, log in, and start streaming.
    ///
    /// Returns the receiving end of the event channel. The connection is read
    /// by a background task, which is the only sender on that channel. Fails
    /// without retrying if the connection cannot be established or `shutdown`
    /// fires first.
    pub async fn connect(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<ClusterEvent>, ClientError> {
        // A previous session is released without the courtesy message.
        self.session = None;
        self.connected.set(false);

        let (reader, writer) = match self.establish(shutdown).await {
            Ok(halves) => halves,
            Err(e) => {
                self.transition(ClientState::Disconnected);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.connected.set(true);
        self.transition(ClientState::Streaming);
        let _ = tx.send(ClusterEvent::Connected).await;

        tokio::spawn(read_loop(
            reader,
            tx,
            self.connected.clone(),
            cancel_rx,
            self.config.read_timeout,
        ));

        self.session = Some(Session {
            writer,
            cancel: cancel_tx,
        });

        Ok(rx)
    }

    /// Open the socket and run the login handshake.
    async fn establish(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(OwnedReadHalf, OwnedWriteHalf), ClientError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        self.transition(ClientState::Connecting);
        info!("Connecting to DX cluster {}...", addr);

        let stream = tokio::select! {
            _ = wait_for_shutdown(shutdown) => return Err(ClientError::Cancelled),
            result = timeout(self.config.connect_timeout, TcpStream::connect(&addr)) => match result {
                Err(_) => return Err(ClientError::ConnectTimeout(addr)),
                Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
                Ok(Ok(stream)) => stream,
            },
        };

        info!("Connected to {}", addr);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }

        let (mut reader, mut writer) = stream.into_split();
        self.transition(ClientState::LoggingIn);
        self.login(&mut reader, &mut writer, shutdown).await?;

        Ok((reader, writer))
    }

    /// Wait for a login prompt and answer it with the callsign.
    ///
    /// Prompts usually arrive without a line break and may be split across
    /// reads, so everything received is accumulated and scanned as a whole.
    async fn login(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ClientError> {
        let login_timeout = self.config.login_timeout;
        let started = Instant::now();
        let mut received = String::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            match login_step(&received, started.elapsed(), login_timeout) {
                LoginStep::SendCallsign => {
                    info!("Login prompt detected, sending callsign: {}", self.config.callsign);
                    writer
                        .write_all(format!("{}\r\n", self.config.callsign).as_bytes())
                        .await?;
                    writer.flush().await?;
                    return Ok(());
                }
                LoginStep::ProceedWithoutPrompt => {
                    warn!(
                        "Login prompt not detected within {}s, proceeding anyway",
                        login_timeout.as_secs_f32()
                    );
                    return Ok(());
                }
                LoginStep::AwaitPrompt => {}
            }

            let remaining = login_timeout.saturating_sub(started.elapsed());
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => return Err(ClientError::Cancelled),
                read = timeout(remaining, reader.read(&mut buf)) => match read {
                    // Deadline reached; the next step decides.
                    Err(_) => continue,
                    Ok(Ok(0)) => return Err(ClientError::ClosedDuringLogin),
                    Ok(Ok(n)) => {
                        received.extend(buf[..n].iter().copied().map(ascii_char));
                        debug!("Login handshake received: {:?}", &received);
                        if received.len() > MAX_PENDING_LINE {
                            let excess = received.len() - MAX_PENDING_LINE;
                            received.drain(..excess);
                        }
                    }
                    Ok(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    /// Close the connection.
    ///
    /// Sends a best-effort `bye` first. Safe to call repeatedly and when not
    /// connected.
    pub async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.connected.set(false);
            return;
        };

        info!("Disconnecting from DX cluster");
        let _ = session.cancel.send(true);

        match timeout(BYE_TIMEOUT, session.writer.write_all(b"bye\r\n")).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Failed to send bye: {}", e),
            Err(_) => debug!("Timed out sending bye"),
        }
        let _ = timeout(BYE_TIMEOUT, session.writer.shutdown()).await;

        self.connected.set(false);
        self.transition(ClientState::Disconnected);
    }
}

/// Read with an optional idle limit.
async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    idle_limit: Option<Duration>,
) -> io::Result<usize> {
    match idle_limit {
        Some(limit) => timeout(limit, reader.read(buf)).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no data received for {}s", limit.as_secs()),
            ))
        }),
        None => reader.read(buf).await,
    }
}

/// Frame the connection into lines until it ends, then report the end.
async fn read_loop(
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<ClusterEvent>,
    connected: LinkFlag,
    mut cancel: watch::Receiver<bool>,
    idle_limit: Option<Duration>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut framer = LineFramer::new();

    let reason = 'read: loop {
        let read = tokio::select! {
            _ = cancel.changed() => break 'read "Disconnect requested".to_string(),
            read = read_chunk(&mut reader, &mut buf, idle_limit) => read,
        };

        match read {
            Ok(0) => {
                warn!("Connection closed by server");
                break "Connection closed by server".to_string();
            }
            Ok(n) => {
                for line in framer.push(&buf[..n]) {
                    debug!("Received: {}", line);
                    if tx.send(ClusterEvent::Line(line)).await.is_err() {
                        break 'read "Event receiver dropped".to_string();
                    }
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                let _ = tx.send(ClusterEvent::Error(e.to_string())).await;
                break format!("Read error: {}", e);
            }
        }
    };

    connected.set(false);
    debug!("Read loop ended: {}", reason);
    let _ = tx.send(ClusterEvent::Disconnected(reason)).await;
}
