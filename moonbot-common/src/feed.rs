use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::state::MoonbotState;
use crate::utils::market::{fetch_recent_trades, fetch_token_info};
use crate::utils::sui::CoinType;
use crate::utils::unix_now;

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Swap event types subscribed to when streaming. Cetus is the only DEX
/// wired up so far.
const DEX_EVENT_TYPES: &[&str] = &[
    "0x23a79c4eb5e60d19a1674058a77c4ba0486265c705f5c7f1f1233cfb2e25e1c6::pool::SwapEvent",
];

/// A single detected token purchase, normalized across feed strategies.
#[derive(Debug, Clone)]
pub struct BuyEvent {
    pub coin_type: CoinType,
    pub buyer: String,
    pub token_amount: f64,
    pub usd_value: f64,
    pub tx_digest: String,
    pub timestamp: u64,
}

#[async_trait]
pub trait FeedEventHandler: Send + Sync + 'static {
    async fn handle_buy(&self, event: &BuyEvent) -> Result<(), anyhow::Error>;
}

/// Starts producing buy events. `FEED_MODE=stream` uses a persistent
/// WebSocket subscription, anything else polls the trade-history API.
pub async fn start_feed(state: Arc<MoonbotState>) {
    let (tx, mut rx) = mpsc::channel(1000);

    match std::env::var("FEED_MODE").as_deref() {
        Ok("stream") => {
            tokio::spawn(stream_buys(Arc::clone(&state), tx));
        }
        _ => {
            tokio::spawn(poll_buys(Arc::clone(&state), tx));
        }
    }

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            const STALE_THRESHOLD: u64 = 60;
            if unix_now().saturating_sub(event.timestamp) > STALE_THRESHOLD {
                log::warn!("Buy event is older than {STALE_THRESHOLD} seconds: {event:?}");
            }
            for handler in state.feed_handlers().await.iter() {
                let started = Instant::now();
                if let Err(err) = handler.handle_buy(&event).await {
                    log::error!("Failed to handle buy {event:?}: {err:?}");
                }
                const HANDLER_WARNING_THRESHOLD: Duration = Duration::from_millis(500);
                let elapsed = started.elapsed();
                if elapsed > HANDLER_WARNING_THRESHOLD {
                    log::warn!(
                        "Buy handler took more than {HANDLER_WARNING_THRESHOLD:?} for {}: {elapsed:?}",
                        event.tx_digest
                    );
                }
            }
        }
    });
}

/// Polls the trade-history endpoint for every tracked coin. The per-coin
/// checkpoint only advances after a successful poll, so a failed request
/// re-covers the gap on the next tick.
async fn poll_buys(state: Arc<MoonbotState>, tx: mpsc::Sender<BuyEvent>) {
    let mut checkpoints: HashMap<CoinType, u64> = HashMap::new();
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        let coins = state.tracked_coins().await;
        checkpoints.retain(|coin, _| coins.contains(coin));
        for coin in coins {
            let since = *checkpoints.entry(coin.clone()).or_insert_with(unix_now);
            match fetch_recent_trades(&coin, since).await {
                Ok(trades) => {
                    for trade in trades {
                        if trade.amount <= 0.0
                            || trade.tx_hash.is_empty()
                            || !trade.buyer.starts_with("0x")
                        {
                            continue;
                        }
                        let event = BuyEvent {
                            coin_type: coin.clone(),
                            buyer: trade.buyer,
                            token_amount: trade.amount,
                            usd_value: trade.value_usd,
                            tx_digest: trade.tx_hash,
                            timestamp: trade.timestamp,
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    checkpoints.insert(coin, unix_now());
                }
                Err(err) => {
                    log::warn!("Failed to fetch trades for {coin}: {err:?}");
                }
            }
        }
    }
}

async fn stream_buys(state: Arc<MoonbotState>, tx: mpsc::Sender<BuyEvent>) {
    let url = match std::env::var("SUI_WS_URL") {
        Ok(url) => url,
        Err(_) => {
            log::error!("FEED_MODE=stream but SUI_WS_URL is not set, buy feed disabled");
            return;
        }
    };
    loop {
        if let Err(err) = connect_and_stream(&state, &url, &tx).await {
            log::warn!("Buy stream error: {err:?}");
        }
        log::warn!("Reconnecting to buy stream in {RECONNECT_DELAY:?}");
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_and_stream(
    state: &MoonbotState,
    url: &str,
    tx: &mpsc::Sender<BuyEvent>,
) -> Result<(), anyhow::Error> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url).await?;
    for (id, event_type) in DEX_EVENT_TYPES.iter().enumerate() {
        let subscription = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id + 1,
            "method": "suix_subscribeEvent",
            "params": [{ "MoveEventType": event_type }],
        });
        stream
            .send(WsMessage::Text(subscription.to_string()))
            .await?;
    }
    log::info!("Subscribed to {} DEX event types", DEX_EVENT_TYPES.len());
    while let Some(message) = stream.next().await {
        match message? {
            WsMessage::Close(_) => break,
            WsMessage::Ping(data) => stream.send(WsMessage::Pong(data)).await?,
            WsMessage::Pong(_) => {}
            WsMessage::Text(text) => {
                // Subscription acks and other non-notification frames don't
                // have `params` and are skipped here.
                let Ok(notification) = serde_json::from_str::<SubscriptionMessage>(&text) else {
                    continue;
                };
                let Some(params) = notification.params else {
                    continue;
                };
                if let Some(event) = parse_swap_event(state, params.result).await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
            WsMessage::Binary(_) => {}
            WsMessage::Frame(_) => unreachable!(),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SubscriptionMessage {
    params: Option<SubscriptionParams>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    result: SuiEvent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuiEvent {
    id: EventId,
    #[serde(default)]
    parsed_json: serde_json::Value,
    #[serde(default)]
    timestamp_ms: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventId {
    tx_digest: String,
}

fn json_u128(value: &serde_json::Value) -> Option<u128> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .or_else(|| value.as_u64().map(u128::from))
}

async fn parse_swap_event(state: &MoonbotState, event: SuiEvent) -> Option<BuyEvent> {
    let data = &event.parsed_json;
    let coin_out = data.get("coin_out_address").and_then(|v| v.as_str())?;
    let coin_type: CoinType = coin_out.parse().ok()?;
    if !state.tracked_coins().await.contains(&coin_type) {
        return None;
    }
    let buyer = data.get("owner").and_then(|v| v.as_str())?.to_owned();
    if !buyer.starts_with("0x") {
        return None;
    }
    let amount_out = data.get("amount_out").and_then(json_u128)?;
    if amount_out == 0 {
        return None;
    }
    let info = match fetch_token_info(&coin_type).await {
        Ok(info) => info,
        Err(err) => {
            log::warn!("Failed to price swap of {coin_type}: {err:?}");
            return None;
        }
    };
    let token_amount = amount_out as f64 / 10f64.powi(info.decimals as i32);
    let usd_value = token_amount * info.price;
    let timestamp = event
        .timestamp_ms
        .as_deref()
        .and_then(|ms| ms.parse::<u64>().ok())
        .map(|ms| ms / 1000)
        .unwrap_or_else(unix_now);
    Some(BuyEvent {
        coin_type,
        buyer,
        token_amount,
        usd_value,
        tx_digest: event.id.tx_digest,
        timestamp,
    })
}
