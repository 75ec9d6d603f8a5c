use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crossbeam_channel::{Receiver, Sender};
use fetcher_common::{Pair, Tick, TickStorage};
use fetcher_feed::coinbase::encode_ticker;
use fetcher_feed::{ChannelConnector, ClientState, FanoutRouter, Frame, RouterConfig, StreamClient};
use fetcher_storage::{MemoryStorage, SqliteStorage};
use rust_decimal::Decimal;

fn frame(pair: &str, second: u32, bid: i64) -> Frame {
    let tick = Tick::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, second).unwrap(),
        pair.parse::<Pair>().unwrap(),
        Decimal::new(bid, 2),
        Decimal::new(bid + 5, 2),
    )
    .unwrap();
    Frame::Payload(encode_ticker(&tick).unwrap().into_bytes())
}

fn client_for(pairs: &[&str]) -> (StreamClient<ChannelConnector>, Sender<Frame>, Receiver<String>) {
    let (connector, frames, sent) = ChannelConnector::new();
    let mut client = StreamClient::new(connector);
    let pairs: Vec<Pair> = pairs.iter().map(|p| p.parse().unwrap()).collect();
    client.set_pairs(&pairs).unwrap();
    (client, frames, sent)
}

fn bids(ticks: &[Tick]) -> Vec<Decimal> {
    ticks.iter().map(Tick::best_bid).collect()
}

#[test]
fn feed_frames_reach_storage_per_pair_in_order() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("memory").unwrap();

    let (mut client, frames, sent) = client_for(&["BTC-USD", "ETH-USD"]);
    let ticks = client.ticks();
    let router = FanoutRouter::new(storage.clone(), RouterConfig::default())
        .spawn(ticks)
        .unwrap();

    frames.send(frame("BTC-USD", 1, 100)).unwrap();
    frames.send(Frame::Payload(b"not json".to_vec())).unwrap();
    frames.send(frame("ETH-USD", 2, 200)).unwrap();
    frames.send(frame("BTC-USD", 3, 101)).unwrap();
    frames.send(Frame::Closed).unwrap();

    client.connect().unwrap();
    let stats = client.serve().unwrap();
    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(stats.ticks, 3);
    assert_eq!(stats.rejected, 1);

    let request: serde_json::Value = serde_json::from_str(&sent.recv().unwrap()).unwrap();
    assert_eq!(request["type"], "subscribe");
    assert_eq!(request["product_ids"], serde_json::json!(["BTC-USD", "ETH-USD"]));
    assert_eq!(request["channels"], serde_json::json!(["ticker"]));

    let report = router.join().unwrap();
    assert_eq!(report.routed, 3);
    assert_eq!(report.workers.len(), 2);
    assert_eq!(report.worker("BTC-USD").unwrap().delivered, 2);
    assert_eq!(report.worker("ETH-USD").unwrap().delivered, 1);

    assert_eq!(
        bids(&storage.ticks_for("BTC-USD").unwrap()),
        vec![Decimal::new(100, 2), Decimal::new(101, 2)]
    );
    assert_eq!(bids(&storage.ticks_for("ETH-USD").unwrap()), vec![Decimal::new(200, 2)]);
}

#[test]
fn stop_from_another_thread_drains_router() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("memory").unwrap();

    let (mut client, frames, _sent) = client_for(&["BTC-USD"]);
    let ticks = client.ticks();
    let router = FanoutRouter::new(storage.clone(), RouterConfig::default())
        .spawn(ticks)
        .unwrap();

    frames.send(frame("BTC-USD", 1, 100)).unwrap();
    client.connect().unwrap();

    let stop = client.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        stop.stop(Some("test"));
    });
    let stats = client.serve().unwrap();
    stopper.join().unwrap();

    assert_eq!(client.state(), ClientState::Stopped);
    assert_eq!(stats.ticks, 1);
    let report = router.join().unwrap();
    assert_eq!(report.delivered(), 1);
    assert_eq!(storage.ticks().unwrap().len(), 1);
    drop(frames);
}

#[test]
fn sqlite_backend_receives_routed_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ticks.db");

    let storage = Arc::new(SqliteStorage::new());
    storage.open(path.to_str().unwrap()).unwrap();

    let (mut client, frames, _sent) = client_for(&["BTC-USD", "ETH-BTC"]);
    let ticks = client.ticks();
    let router = FanoutRouter::new(storage.clone(), RouterConfig::default())
        .spawn(ticks)
        .unwrap();

    for second in 0..5 {
        frames.send(frame("BTC-USD", second, 100 + i64::from(second))).unwrap();
    }
    frames.send(frame("ETH-BTC", 9, 7)).unwrap();
    frames.send(Frame::Closed).unwrap();

    client.connect().unwrap();
    client.serve().unwrap();
    router.join().unwrap();

    assert_eq!(storage.count("BTC-USD").unwrap(), 5);
    assert_eq!(storage.count("ETH-BTC").unwrap(), 1);
    storage.close().unwrap();
}
