//! One websocket session of the simulated feed.
//!
//! The first text frame must be a subscribe request. The session answers with a
//! `subscriptions` acknowledgement (or an `error` frame and a close), registers
//! with the generator and then forwards ticker frames for the requested
//! products until the generator shuts down or the peer goes away.
use std::collections::HashSet;
use std::net::TcpStream;
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use fetcher_common::{FetcherError, Pair, Result, Tick};
use fetcher_feed::coinbase::{PAIR_DELIMITER, SUBSCRIBE, SubscribeRequest, encode_ticker};
use log::{debug, info, warn};
use serde_json::json;
use tungstenite::{Message, WebSocket};

use crate::generator::{Subscription, TickEvent};

/// How long a fresh session may take to send its subscribe request.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves one accepted TCP connection until the generator shuts down or a send fails.
pub fn handle_client(
    stream: TcpStream,
    subscriptions: Sender<Subscription>,
    noise_every: u64,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    stream.set_read_timeout(Some(SUBSCRIBE_TIMEOUT))?;
    let mut socket =
        tungstenite::accept(stream).map_err(|e| FetcherError::Connection(e.to_string()))?;
    info!("Session opened for {}", peer);

    let pairs = match read_subscription(&mut socket) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!("Rejected subscription from {}: {}", peer, e);
            let reply = json!({
                "type": "error",
                "message": "Failed to subscribe",
                "reason": e.to_string(),
            });
            let _ = socket.send(Message::Text(reply.to_string()));
            let _ = socket.close(None);
            return Err(e);
        }
    };

    let product_ids: Vec<String> = pairs.iter().map(|p| p.render(PAIR_DELIMITER)).collect();
    let ack = json!({
        "type": "subscriptions",
        "channels": [{ "name": "ticker", "product_ids": product_ids }],
    });
    send_text(&mut socket, ack.to_string())?;

    let (events_tx, events_rx) = unbounded::<TickEvent>();
    subscriptions
        .send(Subscription {
            pairs: pairs.clone(),
            events: events_tx,
        })
        .map_err(|e| FetcherError::ChannelSend(e.to_string()))?;
    info!("Streaming {:?} to {}", product_ids, peer);

    let wanted: HashSet<Pair> = pairs.into_iter().collect();
    let mut sent: u64 = 0;
    for event in events_rx {
        match event {
            TickEvent::Tick(tick) if wanted.contains(tick.pair()) => {
                sent += 1;
                let text = if noise_every > 0 && sent % noise_every == 0 {
                    noise_frame(sent / noise_every, &tick)
                } else {
                    encode_ticker(&tick)?
                };
                if let Err(e) = send_text(&mut socket, text) {
                    info!("Session {} ended: {}", peer, e);
                    return Ok(());
                }
            }
            TickEvent::Tick(_) => {}
            TickEvent::Shutdown => break,
        }
    }

    debug!("Closing session {}", peer);
    let _ = socket.close(None);
    let _ = socket.flush();
    Ok(())
}

fn read_subscription(socket: &mut WebSocket<TcpStream>) -> Result<Vec<Pair>> {
    let text = loop {
        match socket.read() {
            Ok(Message::Text(text)) => break text,
            Ok(Message::Binary(bytes)) => {
                break String::from_utf8(bytes)
                    .map_err(|e| FetcherError::Subscribe(e.to_string()))?;
            }
            Ok(Message::Close(_)) => {
                return Err(FetcherError::Subscribe(String::from("closed before subscribing")));
            }
            Ok(_) => continue,
            Err(e) => return Err(FetcherError::Transport(e.to_string())),
        }
    };

    let request: SubscribeRequest = serde_json::from_str(&text)
        .map_err(|e| FetcherError::Subscribe(format!("malformed request: {e}")))?;
    if request.request_type != SUBSCRIBE {
        return Err(FetcherError::Subscribe(format!(
            "unexpected request type {:?}",
            request.request_type
        )));
    }
    if request.product_ids.is_empty() {
        return Err(FetcherError::Subscribe(String::from("no product_ids")));
    }
    request
        .product_ids
        .iter()
        .map(|id| Pair::parse(id, PAIR_DELIMITER))
        .collect()
}

fn send_text(socket: &mut WebSocket<TcpStream>, text: String) -> Result<()> {
    socket
        .send(Message::Text(text))
        .map_err(|e| FetcherError::Transport(e.to_string()))
}

/// Malformed stand-in for `tick`; `round` selects the kind of damage.
pub fn noise_frame(round: u64, tick: &Tick) -> String {
    let product_id = tick.pair().render(PAIR_DELIMITER);
    match round % 4 {
        0 => String::from("not json"),
        1 => json!({ "product_id": product_id }).to_string(),
        2 => json!({
            "type": "ticker",
            "time": tick.timestamp(),
            "product_id": tick.pair().render('/'),
            "best_bid": tick.best_bid().to_string(),
            "best_ask": tick.best_ask().to_string(),
        })
        .to_string(),
        _ => json!({
            "type": "ticker",
            "time": tick.timestamp(),
            "product_id": product_id,
            "best_bid": "WRONG",
            "best_ask": tick.best_ask().to_string(),
        })
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{TickGenerator, quote_tick};
    use fetcher_feed::decoder::decode;
    use fetcher_feed::{StreamClient, WsConnector};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn noise_frames_are_rejected_by_the_decoder() {
        let tick = quote_tick(&Pair::new("btc", "usd").unwrap(), 100.0).unwrap();
        for round in 0..4 {
            let frame = noise_frame(round, &tick);
            assert!(decode(frame.as_bytes()).is_err(), "frame {frame} decoded");
        }
        assert!(matches!(
            decode(noise_frame(2, &tick).as_bytes()),
            Err(FetcherError::InvalidProductId { .. })
        ));
    }

    #[test]
    fn stream_client_receives_generated_ticks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let (subscribe_tx, generator) =
            TickGenerator::start(Duration::from_millis(5), Arc::clone(&shutdown)).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handle_client(stream, subscribe_tx, 0)
        });

        let pair = Pair::new("eth", "usd").unwrap();
        let mut client =
            StreamClient::new(WsConnector::default()).with_endpoint(format!("ws://{addr}"));
        client.set_pairs(std::slice::from_ref(&pair)).unwrap();
        let ticks = client.ticks();
        client.connect().unwrap();
        client.subscribe().unwrap();
        client.run().unwrap();

        for _ in 0..3 {
            let tick = ticks.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(tick.pair(), &pair);
            assert!(tick.best_ask() > tick.best_bid());
        }

        client.stop(None);
        let stats = client.wait().unwrap();
        assert!(stats.ticks >= 3);

        shutdown.store(true, Ordering::SeqCst);
        generator.join().unwrap();
        server.join().unwrap().unwrap();
    }
}
