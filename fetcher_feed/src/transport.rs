//! Network session abstraction and its websocket implementation.
//!
//! The stream client only needs three things from a session: send one text
//! frame, read the next frame, close. [`Connector`] opens sessions so the
//! client can be driven by a real socket or by a scripted connection in tests.
use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use fetcher_common::{FetcherError, Result};
use log::debug;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// Read timeout used to poll for stop requests while the feed is quiet.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Outcome of a single read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One complete inbound message.
    Payload(Vec<u8>),
    /// Nothing arrived within the poll interval, or a control frame was handled.
    Idle,
    /// The peer closed the session.
    Closed,
}

/// An open session with the feed.
pub trait FeedConnection: Send {
    /// Sends one text frame.
    fn send_text(&mut self, text: &str) -> Result<()>;
    /// Reads the next frame. Errors are transport failures and end the session.
    fn read_frame(&mut self) -> Result<Frame>;
    /// Releases the session. Never fails; close errors are only logged.
    fn close(&mut self);
}

/// Opens sessions to a feed endpoint.
pub trait Connector {
    /// Dials `endpoint`.
    fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>>;
}

/// Websocket connector over `tungstenite`, with TLS through rustls.
#[derive(Debug, Clone)]
pub struct WsConnector {
    poll_interval: Duration,
}

impl WsConnector {
    /// Connector polling every `poll_interval` while waiting for frames.
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>> {
        let (socket, response) =
            tungstenite::connect(endpoint).map_err(|e| FetcherError::Connection(e.to_string()))?;
        debug!("Websocket handshake with {} answered {}", endpoint, response.status());
        set_read_timeout(&socket, self.poll_interval)
            .map_err(|e| FetcherError::Connection(e.to_string()))?;
        Ok(Box::new(WsConnection { socket }))
    }
}

fn set_read_timeout(
    socket: &WebSocket<MaybeTlsStream<TcpStream>>,
    timeout: Duration,
) -> std::io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(stream) => stream.get_ref().set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

struct WsConnection {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl FeedConnection for WsConnection {
    fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket
            .send(Message::Text(text.to_string()))
            .map_err(|e| FetcherError::Transport(e.to_string()))
    }

    fn read_frame(&mut self) -> Result<Frame> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Frame::Payload(text.into_bytes())),
            Ok(Message::Binary(data)) => Ok(Frame::Payload(data)),
            Ok(Message::Close(_)) => Ok(Frame::Closed),
            Ok(_) => Ok(Frame::Idle),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(Frame::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(Frame::Closed)
            }
            Err(e) => Err(FetcherError::Transport(e.to_string())),
        }
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            debug!("Websocket close: {}", e);
        }
    }
}

/// In-process transport fed through a channel.
///
/// Frames pushed into the paired sender are read back by the client in order;
/// texts the client sends are forwarded to the paired receiver. Dropping the
/// frame sender reads as a transport failure. Useful for replaying captured
/// sessions and for driving the client without a network.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    frames: Receiver<Frame>,
    sent: Sender<String>,
    poll_interval: Duration,
}

impl ChannelConnector {
    /// Creates the connector together with its frame input and sent-text output.
    pub fn new() -> (Self, Sender<Frame>, Receiver<String>) {
        let (frame_tx, frame_rx) = unbounded::<Frame>();
        let (sent_tx, sent_rx) = unbounded::<String>();
        let connector = ChannelConnector {
            frames: frame_rx,
            sent: sent_tx,
            poll_interval: Duration::from_millis(20),
        };
        (connector, frame_tx, sent_rx)
    }
}

impl Connector for ChannelConnector {
    fn connect(&self, _endpoint: &str) -> Result<Box<dyn FeedConnection>> {
        Ok(Box::new(ChannelConnection {
            frames: self.frames.clone(),
            sent: self.sent.clone(),
            poll_interval: self.poll_interval,
        }))
    }
}

struct ChannelConnection {
    frames: Receiver<Frame>,
    sent: Sender<String>,
    poll_interval: Duration,
}

impl FeedConnection for ChannelConnection {
    fn send_text(&mut self, text: &str) -> Result<()> {
        self.sent
            .send(text.to_string())
            .map_err(|e| FetcherError::ChannelSend(e.to_string()))
    }

    fn read_frame(&mut self) -> Result<Frame> {
        match self.frames.recv_timeout(self.poll_interval) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Ok(Frame::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(FetcherError::Transport(String::from(
                "inbound frame channel disconnected",
            ))),
        }
    }

    fn close(&mut self) {}
}
