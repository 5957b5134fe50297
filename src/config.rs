//! Agent configuration.
//!
//! ## Purpose
//!
//! A layered options struct: concrete production-shaped defaults, overlaid
//! by environment variables, then validated before the agent starts any
//! component. Unrecognised environment keys are ignored; recognised keys
//! that fail to parse fall back to the existing value with a logged
//! warning rather than panicking.
//!
//! ## Integration Points
//!
//! - **Startup**: `AgentConfig::from_env()` then `.validate()` are the first
//!   two calls `main` makes (§4.6 step 1).
//! - **Consumers**: every component (event source, cache, executor) is
//!   constructed from a field of this struct rather than reading the
//!   environment itself.

use anyhow::{bail, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub rpc_url: String,
    pub rpc_ws_url: Option<String>,
    pub chain_id: u64,
    pub reflex_router_address: Address,
    pub private_key: String,

    pub use_websocket: bool,
    pub use_polling: bool,
    pub polling_interval_ms: u64,
    pub execution_interval_ms: u64,

    pub top_pools_count: usize,
    pub min_profit_threshold_usd: f64,
    pub max_concurrent_txs: usize,
    pub max_gas_price_gwei: f64,
    pub statistics_window_blocks: u64,
    pub slippage_threshold_pct: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            rpc_ws_url: None,
            chain_id: 1,
            reflex_router_address: Address::zero(),
            private_key: String::new(),

            use_websocket: false,
            use_polling: true,
            polling_interval_ms: 12_000,
            execution_interval_ms: 30_000,

            top_pools_count: 10,
            min_profit_threshold_usd: 10.0,
            max_concurrent_txs: 3,
            max_gas_price_gwei: 100.0,
            statistics_window_blocks: 100,
            slippage_threshold_pct: 5.0,
        }
    }
}

impl AgentConfig {
    /// Overlay environment variables onto the defaults. Required keys that
    /// are absent are left at their (invalid) default and rejected by
    /// `validate()`, matching the teacher's fail-fast-at-startup pattern.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("RPC_URL") {
            cfg.rpc_url = v;
        }
        cfg.rpc_ws_url = std::env::var("RPC_WS_URL").ok().filter(|v| !v.is_empty());
        cfg.chain_id = env_parse_or("CHAIN_ID", cfg.chain_id);
        if let Ok(v) = std::env::var("REFLEX_ROUTER_ADDRESS") {
            match Address::from_str(v.trim_start_matches("0x")) {
                Ok(addr) => cfg.reflex_router_address = addr,
                Err(e) => tracing::warn!(
                    "⚠️ invalid REFLEX_ROUTER_ADDRESS {:?}: {} (keeping default)",
                    v,
                    e
                ),
            }
        }
        if let Ok(v) = std::env::var("PRIVATE_KEY") {
            cfg.private_key = v;
        }

        cfg.use_websocket = env_parse_or("USE_WEBSOCKET", cfg.use_websocket);
        cfg.use_polling = env_parse_or("USE_POLLING", cfg.use_polling);
        cfg.polling_interval_ms = env_parse_or("POLLING_INTERVAL_MS", cfg.polling_interval_ms);
        cfg.execution_interval_ms =
            env_parse_or("EXECUTION_INTERVAL_MS", cfg.execution_interval_ms);

        cfg.top_pools_count = env_parse_or("TOP_POOLS_COUNT", cfg.top_pools_count);
        cfg.min_profit_threshold_usd =
            env_parse_or("MIN_PROFIT_THRESHOLD_USD", cfg.min_profit_threshold_usd);
        cfg.max_concurrent_txs = env_parse_or("MAX_CONCURRENT_TXS", cfg.max_concurrent_txs);
        cfg.max_gas_price_gwei = env_parse_or("MAX_GAS_PRICE_GWEI", cfg.max_gas_price_gwei);
        cfg.statistics_window_blocks =
            env_parse_or("STATISTICS_WINDOW_BLOCKS", cfg.statistics_window_blocks);
        cfg.slippage_threshold_pct = env_parse_or("SLIPPAGE_THRESHOLD", cfg.slippage_threshold_pct);

        cfg
    }

    /// Fail fast on anything §6 marks as required or bounded.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            bail!("RPC_URL is required");
        }
        if self.reflex_router_address.is_zero() {
            bail!("REFLEX_ROUTER_ADDRESS is required");
        }
        if self.private_key.is_empty() {
            bail!("PRIVATE_KEY is required");
        }
        if self.chain_id == 0 {
            bail!("CHAIN_ID must be > 0");
        }
        if self.execution_interval_ms < 1000 {
            bail!("EXECUTION_INTERVAL_MS must be >= 1000");
        }
        if !self.use_websocket && !self.use_polling {
            bail!("at least one of USE_WEBSOCKET or USE_POLLING must be enabled");
        }
        if self.use_websocket && self.rpc_ws_url.is_none() {
            bail!("USE_WEBSOCKET is set but RPC_WS_URL is missing");
        }
        if self.max_concurrent_txs == 0 {
            bail!("MAX_CONCURRENT_TXS must be >= 1");
        }
        if self.top_pools_count == 0 {
            bail!("TOP_POOLS_COUNT must be >= 1");
        }
        if self.statistics_window_blocks == 0 {
            bail!("STATISTICS_WINDOW_BLOCKS must be >= 1");
        }
        Ok(())
    }
}

fn env_parse_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("⚠️ invalid value for {} = {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_fails_validation() {
        let cfg = AgentConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_valid_config_passes_validation() {
        let mut cfg = AgentConfig::default();
        cfg.rpc_url = "http://localhost:8545".into();
        cfg.reflex_router_address = Address::from_low_u64_be(1);
        cfg.private_key = "0x00".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_both_sub_sources_disabled_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.rpc_url = "http://localhost:8545".into();
        cfg.reflex_router_address = Address::from_low_u64_be(1);
        cfg.private_key = "0x00".into();
        cfg.use_polling = false;
        cfg.use_websocket = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_execution_interval_floor_enforced() {
        let mut cfg = AgentConfig::default();
        cfg.rpc_url = "http://localhost:8545".into();
        cfg.reflex_router_address = Address::from_low_u64_be(1);
        cfg.private_key = "0x00".into();
        cfg.execution_interval_ms = 500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("CHAIN_ID", "137");
        std::env::set_var("TOP_POOLS_COUNT", "25");
        let cfg = AgentConfig::from_env();
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.top_pools_count, 25);
        std::env::remove_var("CHAIN_ID");
        std::env::remove_var("TOP_POOLS_COUNT");
    }
}
