//! Structured per-module error types.
//!
//! Each component that can fail gets its own `thiserror` enum carrying the
//! offending data; `anyhow` is used only at composition boundaries (`main`,
//! the orchestrator) to add context while walking up the call stack.

use ethabi::Address;
use thiserror::Error;

/// Swap log → `SwapEvent` decoding failures (§4.1).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    MissingTopics,
    #[error("log topic {0:#x} does not match the swap event signature")]
    UnknownSignature(ethabi::H256),
    #[error("abi parsing failed: {0}")]
    AbiParsing(String),
    #[error("value {value} overflows the target width")]
    ValueOverflow { value: String },
}

/// Pool metadata resolution failures (§4.2).
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("rpc call failed while resolving pool {pool:#x}: {reason}")]
    RpcFailed { pool: Address, reason: String },
    #[error("discovery for pool {0:#x} timed out")]
    DiscoveryTimeout(Address),
    #[error("pool {0:#x} returned malformed token/decimals data")]
    InvalidPoolData(Address),
}

/// Dual event source failures (§4.3).
#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("both push subscription and pull poller are disabled")]
    NoSubSourceEnabled,
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error("rpc error while polling logs: {0}")]
    PollFailed(String),
}

/// Pool cache failures (§4.4). The cache's own operations do not fail in
/// normal operation; this enum exists for the handful of programmer-error
/// and diagnostic paths that can.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pool {0:#x} not present in cache")]
    PoolNotFound(Address),
}

/// Reflex executor failures (§4.5).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("too many in-flight submissions ({pending} >= {max})")]
    ConcurrencyLimitReached { pending: usize, max: usize },
    #[error("gas price {actual_gwei} gwei exceeds cap of {max_gwei} gwei")]
    GasPriceTooHigh { actual_gwei: u64, max_gwei: u64 },
    #[error("gas estimation failed: {0}")]
    GasEstimateFailed(String),
    #[error("failed to fetch transaction nonce: {0}")]
    NonceFetchFailed(String),
    #[error("transaction signing failed: {0}")]
    SigningFailed(String),
    #[error("transaction submission failed: {0}")]
    SubmissionFailed(String),
    #[error("transaction confirmation timed out after {0}s")]
    ConfirmationTimeout(u64),
}
