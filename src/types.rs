//! Core data model shared across the decoder, cache, and executor (§3).

use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A decoded swap observation, produced exactly once by the decoder and
/// consumed by the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapEvent {
    pub pool_address: Address,
    pub block_number: u64,
    pub tx_hash: H256,
    pub log_index: u64,
    pub timestamp_unix_s: u64,
    #[serde(with = "u256_dec")]
    pub amount0: U256,
    pub amount0_negative: bool,
    #[serde(with = "u256_dec")]
    pub amount1: U256,
    pub amount1_negative: bool,
    #[serde(with = "u256_dec")]
    pub sqrt_price_before: U256,
    #[serde(with = "u256_dec")]
    pub sqrt_price_after: U256,
    pub tick: i32,
    pub zero_for_one: bool,
    pub effective_slippage_pct: f64,
    pub price_impact_pct: f64,
}

impl SwapEvent {
    /// `(block_number, log_index)` is the dedup/ordering key (§4.3 invariant).
    pub fn dedup_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Static per-pool attributes, resolved once and never mutated (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetadata {
    pub token0: Address,
    pub token1: Address,
    pub fee_tier_bps: u32,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
}

/// Mutable aggregate over a pool's recent history, recomputed on every
/// insertion (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub swap_count: u64,
    pub zero_for_one_count: u64,
    pub one_for_zero_count: u64,

    pub total_volume_usd: Decimal,
    pub avg_swap_size_usd: Decimal,
    pub largest_swap_usd: Decimal,

    pub avg_slippage_pct: f64,
    pub max_slippage_pct: f64,
    pub high_slippage_count: u64,

    pub direction_bias: f64,

    pub opportunity_score: f64,
    pub recommended_amount: u128,
    pub recommended_direction: bool,

    pub first_seen_block: u64,
    pub last_update_block: u64,
}

impl PoolStatistics {
    pub fn empty(first_seen_block: u64) -> Self {
        Self {
            swap_count: 0,
            zero_for_one_count: 0,
            one_for_zero_count: 0,
            total_volume_usd: Decimal::ZERO,
            avg_swap_size_usd: Decimal::ZERO,
            largest_swap_usd: Decimal::ZERO,
            avg_slippage_pct: 0.0,
            max_slippage_pct: 0.0,
            high_slippage_count: 0,
            direction_bias: 0.0,
            opportunity_score: 0.0,
            recommended_amount: 0,
            recommended_direction: true,
            first_seen_block,
            last_update_block: first_seen_block,
        }
    }
}

/// Snapshot returned by `PoolCache::top`, safe to hand to callers without
/// exposing interior references (§9 "copy-on-read snapshots").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatisticsSnapshot {
    pub pool_address: Address,
    pub stats: PoolStatistics,
}

/// Terminal status of a submitted backrun transaction (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One observability record per submitted backrun; kept in a small ring and
/// never consulted for decisions (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub pool_address: Address,
    pub tx_hash: Option<H256>,
    pub submitted_at_unix_s: u64,
    pub status: ExecutionStatus,
    pub gas_used: Option<u64>,
    #[serde(with = "option_u256_dec")]
    pub profit: Option<U256>,
    pub profit_token: Option<Address>,
    pub failure_reason: Option<String>,
}

/// Outcome of one `submit_backrun` call, returned to the orchestrator (§4.5).
#[derive(Debug, Clone)]
pub struct BackrunOutcome {
    pub success: bool,
    pub tx_hash: Option<H256>,
    pub profit: Option<U256>,
    pub profit_token: Option<Address>,
    pub gas_used: Option<u64>,
    pub execution_time_ms: u64,
    pub error_reason: Option<String>,
}

mod u256_dec {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(d)?;
        U256::from_dec_str(&raw).map_err(serde::de::Error::custom)
    }
}

mod option_u256_dec {
    use ethers::types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<U256>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<U256>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(raw) => U256::from_dec_str(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
