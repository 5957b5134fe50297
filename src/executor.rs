//! Reflex executor (§4.5).
//!
//! ## Purpose
//!
//! Signs and submits backrun transactions to the Reflex router. Owns the
//! nonce sequence and the in-flight concurrency counter exclusively — no
//! other component reads or writes either (§5 shared-resource policy).
//!
//! ## Architecture Role
//!
//! ```text
//! Orchestrator → [Reflex Executor] → signed tx → chain node
//!                     ↓
//!            nonce counter, pending count, execution record ring
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::abi::{Function, Param, ParamType, StateMutability, Token};
use ethers::prelude::*;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use parking_lot::Mutex;

use crate::errors::ExecutorError;
use crate::types::{BackrunOutcome, ExecutionRecord, ExecutionStatus};
use crate::{log_error, log_execution, log_gas, log_success};

const TX_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
const GAS_ESTIMATE_TIMEOUT: Duration = Duration::from_secs(30);
const RPC_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_EXECUTION_RECORDS: usize = 128;

pub struct ExecutorConfig {
    pub reflex_router_address: Address,
    pub max_concurrent_txs: usize,
    pub max_gas_price_gwei: f64,
}

pub struct ReflexExecutor {
    provider: Arc<Provider<Http>>,
    wallet: LocalWallet,
    config: ExecutorConfig,
    nonce: AtomicU64,
    pending: AtomicUsize,
    records: Mutex<VecDeque<ExecutionRecord>>,
}

impl ReflexExecutor {
    pub async fn new(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        config: ExecutorConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(RPC_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?;
        let http = Http::new_with_client(rpc_url.parse()?, client);
        let provider = Arc::new(Provider::new(http));

        let wallet: LocalWallet = private_key.parse::<LocalWallet>()?.with_chain_id(chain_id);

        let starting_nonce = provider
            .get_transaction_count(wallet.address(), None)
            .await?
            .as_u64();

        Ok(Self {
            provider,
            wallet,
            config,
            nonce: AtomicU64::new(starting_nonce),
            pending: AtomicUsize::new(0),
            records: Mutex::new(VecDeque::with_capacity(MAX_EXECUTION_RECORDS)),
        })
    }

    pub async fn current_block(&self) -> anyhow::Result<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    pub async fn wallet_balance(&self) -> anyhow::Result<U256> {
        Ok(self.provider.get_balance(self.wallet.address(), None).await?)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Submission protocol (§4.5). Never propagates an error to the caller —
    /// every failure path returns `BackrunOutcome { success: false, .. }` so
    /// the orchestrator never has to `?` its way out of a cycle.
    pub async fn submit_backrun(
        &self,
        pool_id: [u8; 32],
        amount_in: u128,
        token0_in: bool,
    ) -> BackrunOutcome {
        let started = Instant::now();

        let pending = self.pending.load(Ordering::SeqCst);
        if pending >= self.config.max_concurrent_txs {
            return self.fail(
                started,
                ExecutorError::ConcurrencyLimitReached {
                    pending,
                    max: self.config.max_concurrent_txs,
                }
                .to_string(),
            );
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        let result = self
            .submit_backrun_inner(pool_id, amount_in, token0_in, started)
            .await;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn submit_backrun_inner(
        &self,
        pool_id: [u8; 32],
        amount_in: u128,
        token0_in: bool,
        started: Instant,
    ) -> BackrunOutcome {
        let gas_price = match self.provider.get_gas_price().await {
            Ok(p) => p,
            Err(e) => return self.fail(started, format!("failed to fetch gas price: {e}")),
        };
        let gas_price_gwei = gas_price.as_u128() as f64 / 1e9;
        log_gas!("current gas price {:.1} gwei", gas_price_gwei);
        if gas_price_gwei > self.config.max_gas_price_gwei {
            return self.fail(
                started,
                ExecutorError::GasPriceTooHigh {
                    actual_gwei: gas_price_gwei as u64,
                    max_gwei: self.config.max_gas_price_gwei as u64,
                }
                .to_string(),
            );
        }

        let calldata = match encode_backrun_call(pool_id, amount_in, token0_in, self.wallet.address()) {
            Ok(c) => c,
            Err(e) => return self.fail(started, format!("failed to encode calldata: {e}")),
        };

        // Reserve the nonce atomically up front so two concurrent submissions
        // never build two transactions against the same slot (§5, §7-b). Any
        // pre-send abort below rolls this reservation back.
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst);
        let tx = TransactionRequest::new()
            .to(self.config.reflex_router_address)
            .data(calldata)
            .gas_price(gas_price)
            .nonce(nonce);

        let gas_estimate = match tokio::time::timeout(
            GAS_ESTIMATE_TIMEOUT,
            self.provider.estimate_gas(&tx.clone().into(), None),
        )
        .await
        {
            Ok(Ok(g)) => g,
            Ok(Err(e)) => {
                self.rollback_nonce(nonce);
                return self.fail(started, ExecutorError::GasEstimateFailed(e.to_string()).to_string());
            }
            Err(_) => {
                self.rollback_nonce(nonce);
                return self.fail(started, ExecutorError::GasEstimateFailed("timed out".into()).to_string());
            }
        };
        let tx = tx.gas(gas_estimate);

        let typed_tx: TypedTransaction = tx.into();
        let signature = match self.wallet.sign_transaction(&typed_tx).await {
            Ok(sig) => sig,
            Err(e) => {
                self.rollback_nonce(nonce);
                return self.fail(started, ExecutorError::SigningFailed(e.to_string()).to_string());
            }
        };
        let raw_tx = typed_tx.rlp_signed(&signature);

        log_execution!("submitting backrun nonce={} pool_id={}", nonce, hex::encode(pool_id));
        let pending_tx = match self.provider.send_raw_transaction(raw_tx).await {
            Ok(pending_tx) => pending_tx,
            Err(e) => {
                self.rollback_nonce(nonce);
                return self.fail(started, ExecutorError::SubmissionFailed(e.to_string()).to_string());
            }
        };
        let tx_hash = pending_tx.tx_hash();

        let receipt = match tokio::time::timeout(TX_CONFIRMATION_TIMEOUT, pending_tx).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                return self.fail_with_nonce_consumed(
                    started,
                    Some(tx_hash),
                    "transaction dropped from mempool".to_string(),
                )
            }
            Ok(Err(e)) => {
                return self.fail_with_nonce_consumed(started, Some(tx_hash), e.to_string())
            }
            Err(_) => {
                return self.fail_with_nonce_consumed(
                    started,
                    Some(tx_hash),
                    ExecutorError::ConfirmationTimeout(TX_CONFIRMATION_TIMEOUT.as_secs()).to_string(),
                )
            }
        };

        let (profit, profit_token) = decode_backrun_return(&receipt);
        let success = receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false);
        let gas_used = receipt.gas_used.map(|g| g.as_u64());

        self.push_record(ExecutionRecord {
            pool_address: Address::from_slice(&pool_id[..20]),
            tx_hash: Some(tx_hash),
            submitted_at_unix_s: unix_now(),
            status: if success {
                ExecutionStatus::Confirmed
            } else {
                ExecutionStatus::Failed
            },
            gas_used,
            profit,
            profit_token,
            failure_reason: if success { None } else { Some("reverted".into()) },
        });

        if success {
            log_success!("backrun confirmed tx={:#x} profit={:?}", tx_hash, profit);
        } else {
            log_error!("backrun reverted tx={:#x}", tx_hash);
        }

        BackrunOutcome {
            success,
            tx_hash: Some(tx_hash),
            profit,
            profit_token,
            gas_used,
            execution_time_ms: started.elapsed().as_millis() as u64,
            error_reason: if success { None } else { Some("reverted".into()) },
        }
    }

    fn fail(&self, started: Instant, reason: String) -> BackrunOutcome {
        log_error!("backrun aborted: {}", reason);
        BackrunOutcome {
            success: false,
            tx_hash: None,
            profit: None,
            profit_token: None,
            gas_used: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
            error_reason: Some(reason),
        }
    }

    /// Like `fail`, but for post-send failures where the nonce has already
    /// been consumed by the node (§4.5 state machine: `sent` → `failed` /
    /// `timed_out` still frees the slot but does not roll back the nonce).
    fn fail_with_nonce_consumed(
        &self,
        started: Instant,
        tx_hash: Option<ethers::types::H256>,
        reason: String,
    ) -> BackrunOutcome {
        log_error!("backrun did not confirm: {}", reason);
        self.push_record(ExecutionRecord {
            pool_address: Address::zero(),
            tx_hash,
            submitted_at_unix_s: unix_now(),
            status: ExecutionStatus::Failed,
            gas_used: None,
            profit: None,
            profit_token: None,
            failure_reason: Some(reason.clone()),
        });
        BackrunOutcome {
            success: false,
            tx_hash,
            profit: None,
            profit_token: None,
            gas_used: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
            error_reason: Some(reason),
        }
    }

    /// Releases a nonce reserved by `fetch_add` when the transaction never
    /// reached `send_raw_transaction`. Only rolls back if nothing has
    /// reserved a later slot in the meantime, so a losing race just leaves
    /// the counter where it is rather than handing out a nonce twice.
    fn rollback_nonce(&self, nonce: u64) {
        if self
            .nonce
            .compare_exchange(nonce + 1, nonce, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log_error!("could not roll back nonce={}: a later nonce was already reserved", nonce);
        }
    }

    fn push_record(&self, record: ExecutionRecord) {
        let mut records = self.records.lock();
        if records.len() >= MAX_EXECUTION_RECORDS {
            records.pop_front();
        }
        records.push_back(record);
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `(bytes32 trigger_pool_id, uint112 swap_amount_in, bool token0_in, address recipient, bytes32 config_id)`
/// (§6 router ABI). `config_id` is always the zero bytes32 in this agent.
fn encode_backrun_call(
    pool_id: [u8; 32],
    amount_in: u128,
    token0_in: bool,
    recipient: Address,
) -> anyhow::Result<Bytes> {
    #[allow(deprecated)]
    let function = Function {
        name: "executeBackrun".to_string(),
        inputs: vec![
            Param {
                name: "triggerPoolId".to_string(),
                kind: ParamType::FixedBytes(32),
                internal_type: None,
            },
            Param {
                name: "swapAmountIn".to_string(),
                kind: ParamType::Uint(112),
                internal_type: None,
            },
            Param {
                name: "token0In".to_string(),
                kind: ParamType::Bool,
                internal_type: None,
            },
            Param {
                name: "recipient".to_string(),
                kind: ParamType::Address,
                internal_type: None,
            },
            Param {
                name: "configId".to_string(),
                kind: ParamType::FixedBytes(32),
                internal_type: None,
            },
        ],
        outputs: vec![
            Param {
                name: "profit".to_string(),
                kind: ParamType::Uint(256),
                internal_type: None,
            },
            Param {
                name: "profitToken".to_string(),
                kind: ParamType::Address,
                internal_type: None,
            },
        ],
        constant: None,
        state_mutability: StateMutability::NonPayable,
    };

    let tokens = vec![
        Token::FixedBytes(pool_id.to_vec()),
        Token::Uint(U256::from(amount_in)),
        Token::Bool(token0_in),
        Token::Address(recipient),
        Token::FixedBytes([0u8; 32].to_vec()),
    ];
    Ok(Bytes::from(function.encode_input(&tokens)?))
}

/// Parse `(uint256 profit, address profit_token)` from the receipt's logs if
/// the router emits them; absence is treated as zero profit (§4.5 step 5).
fn decode_backrun_return(
    _receipt: &ethers::types::TransactionReceipt,
) -> (Option<U256>, Option<Address>) {
    // The router's return data is not retrievable from a mined receipt
    // without a prior `eth_call` simulation or a dedicated profit event,
    // neither of which this agent performs; absence is reported as zero
    // profit rather than left unfilled.
    (Some(U256::zero()), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_backrun_call_produces_nonempty_calldata() {
        let calldata = encode_backrun_call([1u8; 32], 1_000, true, Address::zero()).unwrap();
        assert!(!calldata.0.is_empty());
        // 4-byte selector + 5 abi-encoded params, each padded to 32 bytes.
        assert_eq!(calldata.0.len(), 4 + 32 * 5);
    }
}
