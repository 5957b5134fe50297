//! Dual event source (§4.3).
//!
//! Combines a push subscription (long-lived websocket, manual JSON-RPC
//! framing over `tokio-tungstenite`, mirroring the teacher's
//! `PolygonAdapter::connect_websocket`) and a pull poller (`web3::eth().logs`
//! on a fixed interval) into one deduplicated, block-monotonic stream of
//! decoded `SwapEvent`s.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256 as EthersU256;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use web3::types::{FilterBuilder, Log, H256};
use web3::Web3;

use crate::abi::swap_event_signature;
use crate::cache::PoolCache;
use crate::config::AgentConfig;
use crate::decoder::decode_swap_log;
use crate::errors::EventSourceError;
use crate::metadata::PoolMetadataResolver;
use crate::types::SwapEvent;
use crate::{log_success, log_warn};

pub const DEDUP_SET_CAPACITY: usize = 10_000;
const CHANNEL_CAPACITY: usize = 10_000;
const WS_BACKOFF_MIN: Duration = Duration::from_secs(1);
const WS_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// FIFO-evicting dedup set over `(block_number, log_index)` (§4.3).
struct DedupSet {
    seen: HashSet<(u64, u64)>,
    order: VecDeque<(u64, u64)>,
    capacity: usize,
}

impl DedupSet {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns `true` the first time a key is seen.
    fn insert_if_new(&mut self, key: (u64, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Shared cross-source high-water-mark (§4.3/§5): the highest block number
/// emitted so far by either sub-source. The websocket races ahead to head
/// while the poller can deliver an already-passed block range; gating on
/// this alongside `DedupSet` keeps the merged stream block-monotonic, not
/// merely duplicate-free.
struct Watermark(AtomicU64);

impl Watermark {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns `true` if `block` is at or above the current mark, advancing
    /// it to `block` in that case. Returns `false` (and leaves the mark
    /// untouched) for a block already superseded by one emitted earlier.
    fn admit(&self, block: u64) -> bool {
        loop {
            let current = self.0.load(Ordering::SeqCst);
            if block < current {
                return false;
            }
            if self
                .0
                .compare_exchange(current, block, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

pub struct EventSource {
    tx: mpsc::Sender<SwapEvent>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl EventSource {
    /// Spawns the enabled sub-sources and returns the receiving half of the
    /// unified channel. Call `stop()` on the returned handle to close both
    /// sub-sources during shutdown.
    pub fn start(
        config: &AgentConfig,
        web3: Web3<web3::transports::Http>,
        metadata: Arc<PoolMetadataResolver>,
        cache: Arc<PoolCache>,
    ) -> Result<(Self, mpsc::Receiver<SwapEvent>), EventSourceError> {
        if !config.use_websocket && !config.use_polling {
            return Err(EventSourceError::NoSubSourceEnabled);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let dedup = Arc::new(Mutex::new(DedupSet::new(DEDUP_SET_CAPACITY)));
        let watermark = Arc::new(Watermark::new());
        let mut tasks = Vec::with_capacity(2);

        if config.use_polling {
            tasks.push(tokio::spawn(run_poller(
                web3.clone(),
                tx.clone(),
                dedup.clone(),
                watermark.clone(),
                metadata.clone(),
                cache.clone(),
                Duration::from_millis(config.polling_interval_ms),
            )));
        }

        if config.use_websocket {
            if let Some(ws_url) = config.rpc_ws_url.clone() {
                tasks.push(tokio::spawn(run_subscription(
                    ws_url,
                    tx.clone(),
                    dedup.clone(),
                    watermark.clone(),
                    metadata.clone(),
                    cache.clone(),
                )));
            }
        }

        Ok((Self { tx, tasks }, rx))
    }

    /// Shutdown (§4.6): abort both sub-source tasks. Neither loop checks a
    /// cooperative cancellation flag, so this is a hard abort rather than a
    /// graceful drain — acceptable here since a sub-source carries no state
    /// that needs flushing on exit.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Exposed for tests that want to feed synthetic events directly.
    #[cfg(test)]
    pub fn sender(&self) -> mpsc::Sender<SwapEvent> {
        self.tx.clone()
    }
}

async fn run_poller(
    web3: Web3<web3::transports::Http>,
    tx: mpsc::Sender<SwapEvent>,
    dedup: Arc<Mutex<DedupSet>>,
    watermark: Arc<Watermark>,
    metadata: Arc<PoolMetadataResolver>,
    cache: Arc<PoolCache>,
    interval: Duration,
) {
    let mut last_polled_block: Option<u64> = None;
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        let head = match web3.eth().block_number().await {
            Ok(b) => b.as_u64(),
            Err(e) => {
                log_warn!("poller failed to fetch head block: {}", e);
                continue;
            }
        };

        let from_block = match last_polled_block {
            None => {
                // First run: only pull new blocks from here on (§4.3).
                last_polled_block = Some(head);
                continue;
            }
            Some(last) => last + 1,
        };
        if from_block > head {
            continue;
        }

        let filter = FilterBuilder::default()
            .from_block(web3::types::BlockNumber::Number(from_block.into()))
            .to_block(web3::types::BlockNumber::Number(head.into()))
            .topics(Some(vec![H256::from_slice(swap_event_signature().as_bytes())]), None, None, None)
            .build();

        match web3.eth().logs(filter).await {
            Ok(logs) => {
                let mut channel_full = false;
                for log in &logs {
                    if !decode_and_emit_impl(log, &metadata, &cache, &dedup, &watermark, &tx).await {
                        channel_full = true;
                        break;
                    }
                }
                if channel_full {
                    // §4.3/§5: a full channel fails the whole batch; retry
                    // from the same from_block next tick rather than
                    // silently losing the undelivered tail.
                    log_warn!("event channel full, dropping batch at blocks {}..={}", from_block, head);
                } else {
                    last_polled_block = Some(head);
                }
            }
            Err(e) => {
                log_warn!("poller query failed, retrying next tick: {}", e);
                // last_polled_block intentionally not advanced (§4.3).
            }
        }
    }
}

async fn run_subscription(
    ws_url: String,
    tx: mpsc::Sender<SwapEvent>,
    dedup: Arc<Mutex<DedupSet>>,
    watermark: Arc<Watermark>,
    metadata: Arc<PoolMetadataResolver>,
    cache: Arc<PoolCache>,
) {
    let mut backoff = WS_BACKOFF_MIN;

    loop {
        match connect_and_stream(&ws_url, &tx, &dedup, &watermark, &metadata, &cache).await {
            Ok(()) => {
                // Connection closed cleanly; reset backoff and retry.
                backoff = WS_BACKOFF_MIN;
            }
            Err(e) => {
                log_warn!("websocket subscription error, retrying in {:?}: {}", backoff, e);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(WS_BACKOFF_MAX);
    }
}

async fn connect_and_stream(
    ws_url: &str,
    tx: &mpsc::Sender<SwapEvent>,
    dedup: &Arc<Mutex<DedupSet>>,
    watermark: &Arc<Watermark>,
    metadata: &Arc<PoolMetadataResolver>,
    cache: &Arc<PoolCache>,
) -> Result<(), EventSourceError> {
    let (mut ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
        .await
        .map_err(|e| EventSourceError::Transport(e.to_string()))?;
    log_success!("websocket connected to {}", ws_url);

    let sig = swap_event_signature();
    let subscribe = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["logs", { "topics": [format!("{:#x}", sig)] }],
    });
    ws_stream
        .send(Message::Text(subscribe.to_string()))
        .await
        .map_err(|e| EventSourceError::Transport(e.to_string()))?;

    while let Some(msg) = ws_stream.next().await {
        let msg = msg.map_err(|e| EventSourceError::Transport(e.to_string()))?;
        let Message::Text(text) = msg else { continue };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            continue;
        };
        let Some(result) = value
            .get("params")
            .and_then(|p| p.get("result"))
        else {
            continue;
        };
        if let Some(log) = json_to_web3_log(result) {
            // §4.3: the push side drops new events (logged) until space
            // appears rather than failing the whole connection.
            decode_and_emit_impl(&log, metadata, cache, dedup, watermark, tx).await;
        }
    }
    Ok(())
}

/// Decode, resolve metadata, and forward one log onto the unified channel.
/// Returns `false` only when the channel was full and the event was
/// dropped — callers that need batch semantics (the poller) use this to
/// decide whether to advance past the batch.
async fn decode_and_emit_impl(
    log: &Log,
    metadata: &Arc<PoolMetadataResolver>,
    cache: &Arc<PoolCache>,
    dedup: &Mutex<DedupSet>,
    watermark: &Watermark,
    tx: &mpsc::Sender<SwapEvent>,
) -> bool {
    let Some(block_number) = log.block_number else {
        return true;
    };
    let Some(log_index) = log.log_index else {
        return true;
    };
    let block_number = block_number.as_u64();
    let key = (block_number, log_index.as_u64());
    if !dedup.lock().insert_if_new(key) {
        return true;
    }
    if !watermark.admit(block_number) {
        // A later block has already been emitted by the other sub-source;
        // emitting this one now would break the merged stream's monotonic
        // envelope (§4.3/§5).
        log_warn!(
            "dropping out-of-order swap at block {} (already past this point)",
            block_number
        );
        return true;
    }

    let pool_address = ethers::types::Address::from_slice(log.address.as_bytes());
    let existing = cache.last_sqrt_price(pool_address);
    let sqrt_before_hint = existing.unwrap_or(EthersU256::zero());

    match decode_swap_log(log, sqrt_before_hint) {
        Ok(mut event) => {
            if existing.is_none() {
                event.sqrt_price_before = event.sqrt_price_after;
                event.effective_slippage_pct = 0.0;
                event.price_impact_pct = 0.0;
            }
            if metadata.get_cached(pool_address).is_none() {
                let metadata = metadata.clone();
                tokio::spawn(async move {
                    let _ = metadata.resolve(pool_address).await;
                });
            }
            if tx.try_send(event).is_err() {
                log_warn!("event channel full, dropping swap for pool {:#x}", pool_address);
                return false;
            }
            true
        }
        Err(e) => {
            log_warn!("dropping malformed swap log: {}", e);
            true
        }
    }
}

/// Manually build a `web3::types::Log` from an `eth_subscription` JSON
/// payload (the raw websocket frame carries no typed structure), mirroring
/// the teacher's `json_to_web3_log`.
fn json_to_web3_log(value: &serde_json::Value) -> Option<Log> {
    let address = value.get("address")?.as_str()?.parse().ok()?;
    let topics = value
        .get("topics")?
        .as_array()?
        .iter()
        .filter_map(|t| t.as_str())
        .filter_map(|s| s.parse().ok())
        .collect();
    let data_hex = value.get("data")?.as_str()?.trim_start_matches("0x");
    let data = hex::decode(data_hex).ok()?;
    let block_number = parse_hex_u64(value.get("blockNumber")?.as_str()?)?;
    let log_index = parse_hex_u64(value.get("logIndex")?.as_str()?)?;
    let tx_hash = value.get("transactionHash")?.as_str()?.parse().ok()?;

    Some(Log {
        address,
        topics,
        data: web3::types::Bytes(data),
        block_hash: None,
        block_number: Some(block_number.into()),
        transaction_hash: Some(tx_hash),
        transaction_index: None,
        log_index: Some(log_index.into()),
        transaction_log_index: None,
        log_type: None,
        removed: None,
    })
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_set_drops_duplicates() {
        let mut set = DedupSet::new(10);
        assert!(set.insert_if_new((1, 0)));
        assert!(!set.insert_if_new((1, 0)));
        assert!(set.insert_if_new((1, 1)));
    }

    #[test]
    fn test_dedup_set_evicts_oldest_beyond_capacity() {
        let mut set = DedupSet::new(2);
        assert!(set.insert_if_new((1, 0)));
        assert!(set.insert_if_new((1, 1)));
        assert!(set.insert_if_new((1, 2))); // evicts (1, 0)
        assert!(set.insert_if_new((1, 0))); // re-admitted
    }

    #[test]
    fn test_watermark_admits_non_decreasing_blocks() {
        let watermark = Watermark::new();
        assert!(watermark.admit(10));
        assert!(watermark.admit(10)); // same block, still admitted
        assert!(watermark.admit(12));
    }

    #[test]
    fn test_watermark_rejects_block_behind_the_mark() {
        let watermark = Watermark::new();
        assert!(watermark.admit(50));
        assert!(!watermark.admit(40)); // a lagging poller batch arriving late
        assert!(watermark.admit(51));
    }
}
