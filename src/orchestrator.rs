//! Agent orchestrator (§4.6).
//!
//! ## Purpose
//!
//! Brings up every component, drives the periodic backrun cycle, and owns
//! the shutdown sequence. Nothing outside this module decides *when* an
//! execution cycle runs.
//!
//! ## Architecture Role
//!
//! ```text
//! main → [Orchestrator] → EventSource   (ingestion)
//!                       → PoolCache     (scoring)
//!                       → ReflexExecutor (submission)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::sync::mpsc;
use web3::Web3;

use crate::abi::pool_id_bytes32;
use crate::cache::PoolCache;
use crate::config::AgentConfig;
use crate::executor::{ExecutorConfig, ReflexExecutor};
use crate::event_source::EventSource;
use crate::metadata::PoolMetadataResolver;
use crate::{log_execution, log_metrics, log_shutdown, log_success, log_warn};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
const CAPTURE_RATE: f64 = 0.3;

pub struct Agent {
    config: AgentConfig,
    cache: Arc<PoolCache>,
    executor: Arc<ReflexExecutor>,
    event_source: EventSource,
    event_rx: Option<mpsc::Receiver<crate::types::SwapEvent>>,
    cycle_running: Arc<AtomicBool>,
}

impl Agent {
    /// Startup sequence (§4.6 steps 1-4). Config validation (step 1) is the
    /// caller's responsibility, matching `main`'s fail-fast-before-construct
    /// ordering.
    pub async fn bootstrap(config: AgentConfig) -> Result<Self> {
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .context("failed to build shared HTTP client")?;

        let transport = web3::transports::Http::with_client(http_client, config.rpc_url.parse()?);
        let web3 = Web3::new(transport);

        let metadata = Arc::new(PoolMetadataResolver::new(web3.clone()));
        let cache = Arc::new(PoolCache::new(
            config.statistics_window_blocks,
            config.slippage_threshold_pct,
        ));

        let executor = Arc::new(
            ReflexExecutor::new(
                &config.rpc_url,
                &config.private_key,
                config.chain_id,
                ExecutorConfig {
                    reflex_router_address: config.reflex_router_address,
                    max_concurrent_txs: config.max_concurrent_txs,
                    max_gas_price_gwei: config.max_gas_price_gwei,
                },
            )
            .await
            .context("failed to construct Reflex executor")?,
        );

        let (event_source, event_rx) =
            EventSource::start(&config, web3, metadata.clone(), cache.clone())
                .context("failed to start dual event source")?;

        log_success!(
            "agent bootstrapped: chain_id={} router={:#x} polling={} websocket={}",
            config.chain_id,
            config.reflex_router_address,
            config.use_polling,
            config.use_websocket
        );

        Ok(Self {
            config,
            cache,
            executor,
            event_source,
            event_rx: Some(event_rx),
            cycle_running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Runs the agent until an OS interrupt/termination signal arrives, then
    /// performs the shutdown sequence (§4.6).
    pub async fn run(mut self) -> Result<()> {
        let mut rx = self
            .event_rx
            .take()
            .expect("run() called more than once");
        let cache = self.cache.clone();

        // Step 4: ingestion consumer, one call to `cache.record` per event.
        let ingestion = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                cache.record(event);
            }
        });

        // Step 5: immediate execution cycle before the timer is armed.
        self.run_execution_cycle().await;

        // Step 6: recurring timer.
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.execution_interval_ms));
        ticker.tick().await; // the first tick fires immediately; already ran above.

        tokio::select! {
            _ = self.execution_loop(&mut ticker) => {}
            _ = wait_for_shutdown_signal() => {
                log_shutdown!("shutdown signal received, stopping agent");
            }
        }

        ingestion.abort();
        self.event_source.stop();
        self.drain_in_flight().await;
        self.log_final_diagnostics();
        log_shutdown!("agent shut down cleanly");
        Ok(())
    }

    async fn execution_loop(&self, ticker: &mut tokio::time::Interval) {
        loop {
            ticker.tick().await;
            self.run_execution_cycle().await;
        }
    }

    /// The execution cycle (§4.6). Cycles never overlap: `cycle_running` is
    /// a single flag guarding re-entrancy since the timer task is the only
    /// caller, but an in-flight cycle that overruns its own interval must
    /// still be skippable on the next tick.
    async fn run_execution_cycle(&self) {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log_warn!("execution cycle still running, skipping this tick");
            return;
        }

        let block = match self.executor.current_block().await {
            Ok(b) => b,
            Err(e) => {
                log_warn!("execution cycle aborted: failed to fetch current block: {}", e);
                self.cycle_running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let candidates = self.cache.top(self.config.top_pools_count);
        let eligible: Vec<_> = candidates
            .into_iter()
            .filter(|snap| estimated_profit_usd(&snap.stats) >= self.config.min_profit_threshold_usd)
            .collect();

        log_metrics!(
            "execution cycle block={} candidates={} top3={:?}",
            block,
            eligible.len(),
            eligible
                .iter()
                .take(3)
                .map(|s| (s.pool_address, s.stats.opportunity_score))
                .collect::<Vec<_>>()
        );

        let pending = self.executor.pending_count();
        let slots = self.config.max_concurrent_txs.saturating_sub(pending);
        if slots > 0 {
            for snap in eligible.into_iter().take(slots) {
                let executor = self.executor.clone();
                let pool_id = pool_id_bytes32(snap.pool_address);
                let amount_in = snap.stats.recommended_amount;
                let token0_in = snap.stats.recommended_direction;
                tokio::spawn(async move {
                    let outcome = executor.submit_backrun(pool_id, amount_in, token0_in).await;
                    if outcome.success {
                        log_execution!(
                            "backrun succeeded pool={:#x} tx={:?}",
                            snap.pool_address,
                            outcome.tx_hash
                        );
                    } else {
                        log_warn!(
                            "backrun failed pool={:#x} reason={:?}",
                            snap.pool_address,
                            outcome.error_reason
                        );
                    }
                });
            }
        }

        self.cache.prune(block);
        self.cycle_running.store(false, Ordering::SeqCst);
    }

    /// Shutdown step: wait up to the grace period for in-flight submissions
    /// to clear the executor's concurrency slots.
    async fn drain_in_flight(&self) {
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
        while self.executor.pending_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if self.executor.pending_count() > 0 {
            log_warn!(
                "shutdown grace period elapsed with {} submission(s) still in flight",
                self.executor.pending_count()
            );
        }
    }

    fn log_final_diagnostics(&self) {
        let stats = self.cache.cache_stats();
        log_shutdown!(
            "final diagnostics: pools={} total_swaps={} estimated_memory_bytes={}",
            stats.pool_count,
            stats.total_swaps,
            stats.estimated_memory_bytes
        );
    }
}

/// Estimated USD profit for one pool's current snapshot (§4.6 step 3).
fn estimated_profit_usd(stats: &crate::types::PoolStatistics) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    let volume = stats.total_volume_usd.to_f64().unwrap_or(0.0);
    volume * (stats.avg_slippage_pct / 100.0) * CAPTURE_RATE
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
