//! Pool metadata resolver (§4.2).
//!
//! Lazily fetches and caches per-pool static data. Concurrent callers asking
//! about the same pool coalesce into a single chain fetch using a
//! `DashMap<Address, Arc<Notify>>` keyed on the address in flight — the same
//! single-flight-discovery pattern the teacher's pool cache uses, minus its
//! persistence/journal machinery (this agent keeps no state across
//! restarts).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::types::Address;
use tokio::sync::Notify;
use web3::types::CallRequest;
use web3::Web3;

use crate::errors::MetadataError;
use crate::types::PoolMetadata;
use crate::{log_search, log_success, log_warn};

const TOKEN0_SELECTOR: &str = "0dfe1681";
const TOKEN1_SELECTOR: &str = "d21220a7";
const DECIMALS_SELECTOR: &str = "313ce567";
const FEE_SELECTOR: &str = "ddca3f43";

const DISCOVERY_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PoolMetadataResolver {
    web3: Web3<web3::transports::Http>,
    resolved: DashMap<Address, PoolMetadata>,
    in_flight: DashMap<Address, Arc<Notify>>,
}

impl PoolMetadataResolver {
    pub fn new(web3: Web3<web3::transports::Http>) -> Self {
        Self {
            web3,
            resolved: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn get_cached(&self, pool_address: Address) -> Option<PoolMetadata> {
        self.resolved.get(&pool_address).map(|e| e.value().clone())
    }

    /// `resolve(pool_address)` (§4.2): at-most-one chain fetch in flight per
    /// address. Failures are not cached — the next caller retries.
    pub async fn resolve(&self, pool_address: Address) -> Result<PoolMetadata, MetadataError> {
        if let Some(meta) = self.get_cached(pool_address) {
            return Ok(meta);
        }

        // Either we win the race and become the fetcher, or someone else is
        // already fetching and we wait on their notification.
        let became_fetcher;
        let notify = match self.in_flight.entry(pool_address) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                became_fetcher = false;
                e.get().clone()
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let notify = Arc::new(Notify::new());
                e.insert(notify.clone());
                became_fetcher = true;
                notify
            }
        };
        if !became_fetcher {
            return self.wait_for_discovery(pool_address, notify).await;
        }

        log_search!("resolving pool metadata for {:#x}", pool_address);
        let outcome = self.fetch_from_chain(pool_address).await;
        self.in_flight.remove(&pool_address);
        notify.notify_waiters();

        match outcome {
            Ok(meta) => {
                self.resolved.insert(pool_address, meta.clone());
                log_success!("resolved pool {:#x}", pool_address);
                Ok(meta)
            }
            Err(e) => {
                log_warn!("metadata resolution failed for {:#x}: {}", pool_address, e);
                Err(e)
            }
        }
    }

    async fn wait_for_discovery(
        &self,
        pool_address: Address,
        notify: Arc<Notify>,
    ) -> Result<PoolMetadata, MetadataError> {
        match tokio::time::timeout(DISCOVERY_WAIT_TIMEOUT, notify.notified()).await {
            Ok(()) => self
                .get_cached(pool_address)
                .ok_or(MetadataError::RpcFailed {
                    pool: pool_address,
                    reason: "concurrent discovery failed".to_string(),
                }),
            Err(_) => Err(MetadataError::DiscoveryTimeout(pool_address)),
        }
    }

    async fn fetch_from_chain(&self, pool_address: Address) -> Result<PoolMetadata, MetadataError> {
        let token0 = self.call_address(pool_address, TOKEN0_SELECTOR).await?;
        let token1 = self.call_address(pool_address, TOKEN1_SELECTOR).await?;
        let token0_decimals = self.call_u8(token0, DECIMALS_SELECTOR).await?;
        let token1_decimals = self.call_u8(token1, DECIMALS_SELECTOR).await?;
        let fee_tier_bps = self.call_fee(pool_address).await.unwrap_or(30); // V2-style default

        Ok(PoolMetadata {
            token0,
            token1,
            fee_tier_bps,
            token0_decimals,
            token1_decimals,
        })
    }

    async fn eth_call(&self, to: Address, selector: &str) -> Result<Vec<u8>, MetadataError> {
        let data = hex::decode(selector).map_err(|e| MetadataError::RpcFailed {
            pool: to,
            reason: e.to_string(),
        })?;
        let req = CallRequest {
            to: Some(web3::types::H160::from_slice(to.as_bytes())),
            data: Some(web3::types::Bytes(data)),
            ..Default::default()
        };
        self.web3
            .eth()
            .call(req, None)
            .await
            .map(|b| b.0)
            .map_err(|e| MetadataError::RpcFailed {
                pool: to,
                reason: e.to_string(),
            })
    }

    async fn call_address(&self, pool: Address, selector: &str) -> Result<Address, MetadataError> {
        let raw = self.eth_call(pool, selector).await?;
        if raw.len() < 32 {
            return Err(MetadataError::InvalidPoolData(pool));
        }
        Ok(Address::from_slice(&raw[12..32]))
    }

    async fn call_u8(&self, token: Address, selector: &str) -> Result<u8, MetadataError> {
        let raw = self.eth_call(token, selector).await?;
        raw.last().copied().ok_or(MetadataError::InvalidPoolData(token))
    }

    async fn call_fee(&self, pool: Address) -> Result<u32, MetadataError> {
        let raw = self.eth_call(pool, FEE_SELECTOR).await?;
        if raw.len() < 32 {
            return Err(MetadataError::InvalidPoolData(pool));
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&raw[28..32]);
        Ok(u32::from_be_bytes(buf))
    }
}
