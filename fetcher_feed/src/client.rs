//! Streaming feed client.
//!
//! The client owns one long-lived session with the feed and walks a strict
//! state machine:
//!
//! ```text
//! Idle -> Connected -> Subscribed -> Reading -> Stopped
//! ```
//!
//! - `connect` dials the endpoint, `subscribe` sends the subscription request,
//!   `run` starts the read loop on its own thread and returns immediately.
//! - The read loop ends on an explicit stop or on a read failure, which takes
//!   the same stop path. Either way the client reaches `Stopped`, the tick
//!   stream is closed and the session released.
//! - `stop` may be called from any state and any thread (see [`StopHandle`]);
//!   it is idempotent and never fails. Before `Reading` it finishes the client
//!   on the spot, during `Reading` it leaves finishing to the read loop.
//!
//! Stop is a flag plus a closed channel: setting the flag is guarded so it
//! happens once, and dropping the only `done` sender wakes every context
//! blocked in `select!` on it without anyone sending into a closed channel.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use fetcher_common::{FetcherError, Pair, Result, Tick};
use log::{debug, error, info, warn};
use strum_macros::Display;

use crate::coinbase::{self, SubscribeRequest, TICKER_CHANNEL};
use crate::decoder::{self, FeedMessage};
use crate::transport::{Connector, FeedConnection, Frame};

/// Capacity of the outbound tick stream.
pub const TICK_STREAM_CAPACITY: usize = 1;

/// Lifecycle of a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClientState {
    /// Configured, no session yet.
    Idle,
    /// Session open, nothing sent.
    Connected,
    /// Subscription request sent.
    Subscribed,
    /// Read loop running.
    Reading,
    /// Terminal.
    Stopped,
}

/// Counters reported by the read loop when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Payload frames received.
    pub frames: u64,
    /// Ticks handed to the tick stream.
    pub ticks: u64,
    /// Frames skipped because they failed to decode.
    pub rejected: u64,
    /// Frames of a type the client does not handle.
    pub ignored: u64,
}

enum Outbound {
    Unprovisioned,
    Open { tx: Sender<Tick>, rx: Receiver<Tick> },
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the client, its stop handles and the read loop.
struct Session {
    state: Mutex<ClientState>,
    stop_requested: AtomicBool,
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    connection: Mutex<Option<Box<dyn FeedConnection>>>,
    outbound: Mutex<Outbound>,
}

impl Session {
    fn new() -> Self {
        let (done_tx, done_rx) = bounded::<()>(0);
        Session {
            state: Mutex::new(ClientState::Idle),
            stop_requested: AtomicBool::new(false),
            done_tx: Mutex::new(Some(done_tx)),
            done_rx,
            connection: Mutex::new(None),
            outbound: Mutex::new(Outbound::Unprovisioned),
        }
    }

    fn state(&self) -> ClientState {
        *lock(&self.state)
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Raises the stop flag once. Returns `false` if it was already raised.
    fn signal_stop(&self, reason: Option<&str>) -> bool {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(reason) = reason {
            info!("Stream client stopping: {}", reason);
        }
        drop(lock(&self.done_tx).take());
        true
    }

    fn request_stop(&self, reason: Option<&str>) {
        let mut state = lock(&self.state);
        if !self.signal_stop(reason) {
            return;
        }
        if *state != ClientState::Reading {
            self.finish(&mut state);
        }
    }

    /// Moves to `Stopped`, closes the tick stream and releases any parked session.
    fn finish(&self, state: &mut ClientState) {
        *state = ClientState::Stopped;
        *lock(&self.outbound) = Outbound::Closed;
        if let Some(mut connection) = lock(&self.connection).take() {
            connection.close();
        }
    }

    fn tick_stream(&self) -> Receiver<Tick> {
        let mut outbound = lock(&self.outbound);
        match &*outbound {
            Outbound::Open { rx, .. } => rx.clone(),
            Outbound::Closed => bounded::<Tick>(0).1,
            Outbound::Unprovisioned => {
                let (tx, rx) = bounded::<Tick>(TICK_STREAM_CAPACITY);
                *outbound = Outbound::Open { tx, rx: rx.clone() };
                rx
            }
        }
    }

    fn handle_payload(&self, payload: &[u8], stats: &mut ReadStats) -> bool {
        match decoder::decode(payload) {
            Ok(FeedMessage::Ticker(tick)) => return self.deliver(tick, stats),
            Ok(FeedMessage::Subscriptions(confirmation)) => {
                info!("Feed confirmed subscriptions: {:?}", confirmation.channels);
            }
            Ok(FeedMessage::Error(report)) => {
                warn!(
                    "Feed reported an error: {} {}",
                    report.message,
                    report.reason.unwrap_or_default()
                );
            }
            Ok(FeedMessage::Heartbeat) => debug!("Heartbeat"),
            Ok(FeedMessage::Other(kind)) => {
                stats.ignored += 1;
                debug!("Ignoring {} message", kind);
            }
            Err(e) if e.is_decode_error() => {
                stats.rejected += 1;
                warn!("Skipping frame: {}", e);
            }
            Err(e) => {
                stats.rejected += 1;
                error!("Skipping frame after unexpected failure: {}", e);
            }
        }
        true
    }

    /// Pushes a tick downstream. Returns `false` when stop was requested while waiting.
    fn deliver(&self, tick: Tick, stats: &mut ReadStats) -> bool {
        let tx = match &*lock(&self.outbound) {
            Outbound::Open { tx, .. } => tx.clone(),
            _ => return true,
        };
        select! {
            send(tx, tick) -> res => {
                match res {
                    Ok(()) => stats.ticks += 1,
                    Err(_) => debug!("Tick stream has no consumer"),
                }
                true
            },
            recv(self.done_rx) -> _ => false,
        }
    }
}

fn read_loop(session: Arc<Session>, mut connection: Box<dyn FeedConnection>) -> ReadStats {
    let mut stats = ReadStats::default();
    info!("Read loop started");

    while !session.is_stop_requested() {
        match connection.read_frame() {
            Ok(Frame::Payload(payload)) => {
                stats.frames += 1;
                if !session.handle_payload(&payload, &mut stats) {
                    break;
                }
            }
            Ok(Frame::Idle) => continue,
            Ok(Frame::Closed) => {
                session.request_stop(Some("connection closed"));
                break;
            }
            Err(e) => {
                session.request_stop(Some(&format!("connection closed: {}", e)));
                break;
            }
        }
    }

    connection.close();
    session.finish(&mut lock(&session.state));
    info!(
        "Read loop finished: {} frames, {} ticks, {} rejected, {} ignored",
        stats.frames, stats.ticks, stats.rejected, stats.ignored
    );
    stats
}

/// Cloneable handle that stops a [`StreamClient`] from another context.
#[derive(Clone)]
pub struct StopHandle {
    session: Arc<Session>,
}

impl StopHandle {
    /// Requests termination; see [`StreamClient::stop`].
    pub fn stop(&self, reason: Option<&str>) {
        self.session.request_stop(reason);
    }

    /// True once the client reached `Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.session.state() == ClientState::Stopped
    }
}

/// Client for the streaming price feed.
pub struct StreamClient<C: Connector> {
    connector: C,
    endpoint: String,
    pairs: Vec<Pair>,
    channels: Vec<String>,
    session: Arc<Session>,
    reader: Option<JoinHandle<ReadStats>>,
}

impl<C: Connector> StreamClient<C> {
    /// Client for the public feed endpoint.
    pub fn new(connector: C) -> Self {
        StreamClient {
            connector,
            endpoint: String::from(coinbase::WS_ENDPOINT),
            pairs: Vec::new(),
            channels: Vec::new(),
            session: Arc::new(Session::new()),
            reader: None,
        }
    }

    /// Points the client at another endpoint speaking the same protocol,
    /// e.g. a local `feed_server`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Endpoint the client dials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sets the pairs to subscribe to.
    pub fn set_pairs(&mut self, pairs: &[Pair]) -> Result<()> {
        if pairs.is_empty() {
            return Err(FetcherError::SetupIncomplete(String::from(
                "at least one pair should be set",
            )));
        }
        self.pairs = pairs.to_vec();
        Ok(())
    }

    /// Sets the channels to subscribe to (e.g. `ticker`, `heartbeat`).
    pub fn set_channels<I, S>(&mut self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if channels.is_empty() {
            return Err(FetcherError::SetupIncomplete(String::from(
                "at least one channel should be set",
            )));
        }
        self.channels = channels;
        Ok(())
    }

    /// Configured pairs.
    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    /// Configured channels.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.session.state()
    }

    /// Fails unless at least one pair and one channel are configured.
    pub fn validate_setup(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Err(FetcherError::SetupIncomplete(String::from("pairs aren't set")));
        }
        if self.channels.is_empty() {
            return Err(FetcherError::SetupIncomplete(String::from("channels aren't set")));
        }
        Ok(())
    }

    fn expect_state(state: ClientState, expected: ClientState) -> Result<()> {
        if state != expected {
            return Err(FetcherError::InvalidState {
                expected: expected.to_string(),
                actual: state.to_string(),
            });
        }
        Ok(())
    }

    /// Opens the session. On failure the client stays `Idle`.
    pub fn connect(&mut self) -> Result<()> {
        Self::expect_state(self.state(), ClientState::Idle)?;
        self.validate_setup()?;

        info!("Connecting to {}", self.endpoint);
        let mut connection = self.connector.connect(&self.endpoint).map_err(|e| {
            error!("Dial to {} failed: {}", self.endpoint, e);
            match e {
                FetcherError::Connection(_) => e,
                other => FetcherError::Connection(other.to_string()),
            }
        })?;

        let mut state = lock(&self.session.state);
        if let Err(e) = Self::expect_state(*state, ClientState::Idle) {
            connection.close();
            return Err(e);
        }
        *lock(&self.session.connection) = Some(connection);
        *state = ClientState::Connected;
        Ok(())
    }

    /// Sends the subscription request built from the configured pairs and channels.
    pub fn subscribe(&mut self) -> Result<()> {
        self.validate_setup()?;
        let mut state = lock(&self.session.state);
        Self::expect_state(*state, ClientState::Connected)?;

        let request = SubscribeRequest::new(&self.pairs, &self.channels);
        let text = request.to_json()?;
        let mut connection = lock(&self.session.connection);
        let connection = connection
            .as_mut()
            .ok_or_else(|| FetcherError::Subscribe(String::from("no open session")))?;
        connection.send_text(&text).map_err(|e| {
            error!("Subscribe failed: {}. message: {}", e, text);
            FetcherError::Subscribe(e.to_string())
        })?;

        info!(
            "Subscribed to {:?} on channels {:?}",
            request.product_ids, request.channels
        );
        *state = ClientState::Subscribed;
        Ok(())
    }

    /// Starts the read loop on its own thread and returns once it is scheduled.
    pub fn run(&mut self) -> Result<()> {
        let connection = {
            let mut state = lock(&self.session.state);
            Self::expect_state(*state, ClientState::Subscribed)?;
            let connection = lock(&self.session.connection)
                .take()
                .ok_or_else(|| FetcherError::Transport(String::from("no open session")))?;
            *state = ClientState::Reading;
            connection
        };

        let session = Arc::clone(&self.session);
        match thread::Builder::new()
            .name(String::from("feed-reader"))
            .spawn(move || read_loop(session, connection))
        {
            Ok(handle) => {
                self.reader = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.session.signal_stop(Some("failed to start read loop"));
                self.session.finish(&mut lock(&self.session.state));
                Err(FetcherError::Io(e))
            }
        }
    }

    /// Blocks until the read loop has finished and returns its counters.
    pub fn wait(&mut self) -> Result<ReadStats> {
        match self.reader.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FetcherError::Transport(String::from("read loop panicked"))),
            None => {
                Self::expect_state(self.state(), ClientState::Stopped)?;
                Ok(ReadStats::default())
            }
        }
    }

    /// Subscribes, runs the read loop and waits for it to finish.
    pub fn serve(&mut self) -> Result<ReadStats> {
        self.subscribe()?;
        self.run()?;
        self.wait()
    }

    /// Requests termination. Idempotent; the reason is only logged.
    pub fn stop(&self, reason: Option<&str>) {
        self.session.request_stop(reason);
    }

    /// Handle for stopping the client from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            session: Arc::clone(&self.session),
        }
    }

    /// Stream of normalized ticks, in receipt order.
    ///
    /// Provisioned on first call; also adds the ticker channel to the
    /// configuration if missing. The stream closes once the client is
    /// `Stopped`.
    pub fn ticks(&mut self) -> Receiver<Tick> {
        if !self.channels.iter().any(|c| c == TICKER_CHANNEL) {
            if !matches!(self.state(), ClientState::Idle | ClientState::Connected) {
                warn!("Ticker channel added after subscription; it is not requested on this session");
            }
            self.channels.push(String::from(TICKER_CHANNEL));
        }
        self.session.tick_stream()
    }
}

impl<C: Connector> Drop for StreamClient<C> {
    fn drop(&mut self) {
        self.session.request_stop(None);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}
