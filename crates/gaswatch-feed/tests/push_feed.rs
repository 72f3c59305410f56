//! Chain feed and oracle against an in-process `eth_subscribe` server.

use alloy::primitives::U256;
use futures_util::{SinkExt, StreamExt};
use chrono::Utc;
use gaswatch_core::{Chain, PoolOrientation, PriceSource, RawFeeFields, RawFeeReading};
use gaswatch_feed::{
    swap_topic, BlockHeader, BoxFuture, ChainFeed, ChainFeedConfig, FeeSource, FeedError,
    FeedResult, FeedState, GasStore, MockFeeSource, MockPoolSource, OracleAdapter, OracleConfig,
    PushSettings,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const SQRT_1800: u128 = 1_867_425_699_159_537_997_291_064_607_581_939;

#[derive(Clone, Copy, PartialEq)]
enum Serve {
    /// Ack, push the payloads, keep the socket open.
    Hold,
    /// Answer the subscribe with an error.
    Reject,
    /// Connection `k` acks, pushes heads `100..=100+k` (capped at `last`),
    /// then closes. Every reconnect replays the heads already sent.
    ReplayAndClose { last: u64 },
}

async fn read_request<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> Option<Value>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).ok(),
            Some(Ok(_)) => continue,
            _ => return None,
        }
    }
}

fn notification(result: Value) -> Message {
    let note = json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": {"subscription": "0xfeed", "result": result}
    });
    Message::Text(note.to_string())
}

/// Serves each connection according to `serve`.
async fn spawn_server(payloads: Vec<Value>, serve: Serve) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut connections = 0u64;
        while let Ok((stream, _)) = listener.accept().await {
            let payloads = payloads.clone();
            let k = connections;
            connections += 1;
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                let Some(request) = read_request(&mut ws).await else {
                    return;
                };
                let id = request["id"].clone();

                if serve == Serve::Reject {
                    let reply = json!({
                        "jsonrpc": "2.0", "id": id,
                        "error": {"code": -32601, "message": "method not found"}
                    });
                    let _ = ws.send(Message::Text(reply.to_string())).await;
                    while let Some(Ok(_)) = ws.next().await {}
                    return;
                }

                let ack = json!({"jsonrpc": "2.0", "id": id, "result": "0xfeed"});
                ws.send(Message::Text(ack.to_string())).await.unwrap();

                if let Serve::ReplayAndClose { last } = serve {
                    // Pauses let every state change be observed on its own.
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    for number in 100..=(100 + k).min(last) {
                        let _ = ws.send(notification(head(number))).await;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = ws.close(None).await;
                    return;
                }

                for result in payloads {
                    ws.send(notification(result)).await.unwrap();
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    format!("ws://{addr}")
}

fn push_settings() -> PushSettings {
    PushSettings {
        subscribe_timeout_ms: 2_000,
        reconnect_base_delay_ms: 20,
        reconnect_max_delay_ms: 100,
        ..Default::default()
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn head(number: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "timestamp": "0x6553f100",
        "baseFeePerGas": "0x5d21dba00"
    })
}

#[tokio::test]
async fn test_new_heads_drive_fetches() {
    let url = spawn_server(vec![head(100), head(101), json!("garbage")], Serve::Hold).await;

    let source = Arc::new(MockFeeSource::new(Chain::Ethereum));
    source.push_fee_market(100, 25_000_000_000, 1_000_000_000);
    source.push_fee_market(101, 26_000_000_000, 1_000_000_000);

    let store = Arc::new(GasStore::new());
    let cancel = CancellationToken::new();
    let feed = ChainFeed::new(
        ChainFeedConfig {
            chain: Chain::Ethereum,
            ws_url: Some(url),
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_millis(500),
            exponent: 9,
            push: push_settings(),
        },
        source.clone(),
        store.clone(),
        cancel.clone(),
    );
    let state = feed.state();
    let handle = tokio::spawn(feed.run());

    wait_for(|| store.chain_state(Chain::Ethereum).history.len() == 2).await;
    assert_eq!(*state.borrow(), FeedState::Subscribed);
    assert_eq!(source.heads(), vec![Some(100), Some(101)]);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let eth = store.chain_state(Chain::Ethereum);
    assert_eq!(eth.last_block, Some(101));
    assert_eq!(eth.gas_price.to_string(), "27");
    assert_eq!(*state.borrow(), FeedState::Disconnected);
}

#[tokio::test]
async fn test_rejected_push_falls_back_to_polling() {
    let url = spawn_server(Vec::new(), Serve::Reject).await;

    let source = Arc::new(MockFeeSource::new(Chain::Polygon));
    source.push_fee_market(5, 40_000_000_000, 30_000_000_000);

    let store = Arc::new(GasStore::new());
    let cancel = CancellationToken::new();
    let feed = ChainFeed::new(
        ChainFeedConfig {
            chain: Chain::Polygon,
            ws_url: Some(url),
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(500),
            exponent: 9,
            push: push_settings(),
        },
        source.clone(),
        store.clone(),
        cancel.clone(),
    );
    let mut state = feed.state();
    let handle = tokio::spawn(feed.run());

    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == FeedState::Polling))
        .await
        .unwrap()
        .unwrap();
    wait_for(|| store.chain_state(Chain::Polygon).history.len() == 1).await;

    // Push keeps being retried in the background and never subscribes.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(matches!(
        *state.borrow(),
        FeedState::Polling | FeedState::Connecting
    ));
    assert!(source.heads().iter().all(Option::is_none));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

/// Builds each reading from the pushed head, so a replayed head yields the
/// same block again. Poll ticks (no head) fail.
#[derive(Default)]
struct HeadEchoSource {
    heads: Mutex<Vec<u64>>,
}

impl HeadEchoSource {
    fn seen(&self, number: u64) -> usize {
        self.heads.lock().iter().filter(|n| **n == number).count()
    }
}

impl FeeSource for HeadEchoSource {
    fn fetch_reading(&self, head: Option<BlockHeader>) -> BoxFuture<'_, FeedResult<RawFeeReading>> {
        Box::pin(async move {
            let head = head.ok_or_else(|| FeedError::Rpc {
                code: -32000,
                message: "push only".to_string(),
            })?;
            self.heads.lock().push(head.number);
            Ok(RawFeeReading {
                chain: Chain::Ethereum,
                block_number: Some(head.number),
                observed_at: Utc::now(),
                fields: RawFeeFields::FeeMarket {
                    base_fee: 20_000_000_000,
                    fee_cap: None,
                    priority_fee: Some(1_000_000_000),
                },
            })
        })
    }
}

#[tokio::test]
async fn test_dropped_subscription_reconnects_without_duplicates() {
    let url = spawn_server(Vec::new(), Serve::ReplayAndClose { last: 102 }).await;

    let source = Arc::new(HeadEchoSource::default());
    let store = Arc::new(GasStore::new());
    let cancel = CancellationToken::new();
    let feed = ChainFeed::new(
        ChainFeedConfig {
            chain: Chain::Ethereum,
            ws_url: Some(url),
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_millis(500),
            exponent: 9,
            push: push_settings(),
        },
        source.clone(),
        store.clone(),
        cancel.clone(),
    );

    let states = Arc::new(Mutex::new(Vec::new()));
    let mut rx = feed.state();
    let recorder = {
        let states = states.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                states.lock().push(*rx.borrow_and_update());
            }
        })
    };
    let handle = tokio::spawn(feed.run());

    // Connection four replays 100..=102 once more.
    wait_for(|| source.seen(102) >= 2).await;
    let eth = store.chain_state(Chain::Ethereum);
    assert_eq!(eth.history.len(), 3);
    assert_eq!(eth.last_block, Some(102));
    assert_eq!(source.seen(100), 4);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    recorder.abort();

    let states = states.lock().clone();
    assert_eq!(
        states[..6],
        [
            FeedState::Connecting,
            FeedState::Subscribed,
            FeedState::Disconnected,
            FeedState::Connecting,
            FeedState::Subscribed,
            FeedState::Disconnected,
        ],
        "{states:?}"
    );
    assert!(!states.contains(&FeedState::Polling), "{states:?}");
    for pair in states.windows(2) {
        if pair[0] == FeedState::Subscribed {
            assert_eq!(pair[1], FeedState::Disconnected, "{states:?}");
        }
    }
    assert_eq!(store.chain_state(Chain::Ethereum).history.len(), 3);
}

#[tokio::test]
async fn test_swap_events_update_price() {
    let mut data = vec![0u8; 5 * 32];
    data[64..96].copy_from_slice(&U256::from(SQRT_1800).to_be_bytes::<32>());
    let zero_word = format!("0x{}", "00".repeat(32));
    let swap = json!({
        "address": "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640",
        "blockNumber": "0x10",
        "logIndex": "0x0",
        "topics": [swap_topic(), zero_word.clone(), zero_word],
        "data": format!("0x{}", hex::encode(&data)),
        "removed": false
    });
    let malformed = json!({"topics": [swap_topic()], "data": "0x00"});
    let url = spawn_server(vec![malformed, swap], Serve::Hold).await;

    let source = Arc::new(MockPoolSource::new());
    let store = Arc::new(GasStore::new());
    let cancel = CancellationToken::new();
    let adapter = OracleAdapter::new(
        OracleConfig {
            ws_url: Some(url),
            pool_address: "0x88e6a0c2ddd26feeb64f039a2c41296fcb3f5640".to_string(),
            orientation: PoolOrientation {
                token0_decimals: 6,
                token1_decimals: 18,
                quote_is_token0: true,
            },
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_millis(200),
            backfill_chunks: 5,
            backfill_chunk_size: 500,
            push: push_settings(),
        },
        source.clone(),
        store.clone(),
        cancel.clone(),
    );
    let handle = tokio::spawn(adapter.run());

    wait_for(|| store.price().price.is_some()).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let price = store.price();
    assert_eq!(price.source, Some(PriceSource::Push));
    assert!((price.price.unwrap() - 1800.0).abs() < 1e-6);
}
