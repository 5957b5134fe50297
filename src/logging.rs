//! Standardized emoji logging for the reflex agent.
//!
//! Provides consistent emoji usage across ingestion, scoring, execution and
//! shutdown paths so the stdout log stream stays scannable in a terminal.

/// Standard emoji set for agent logging.
pub struct LogEmoji;

impl LogEmoji {
    // Status indicators
    pub const SUCCESS: &'static str = "✅";
    pub const ERROR: &'static str = "❌";
    pub const WARNING: &'static str = "⚠️";
    pub const INFO: &'static str = "ℹ️";

    // Module-specific
    pub const SEARCH: &'static str = "🔍"; // metadata resolution / discovery
    pub const CHART: &'static str = "📊"; // scoring / statistics
    pub const EXECUTE: &'static str = "⚡"; // backrun submission
    pub const MONEY: &'static str = "💰"; // profit / financial
    pub const NETWORK: &'static str = "🌐"; // RPC / subscription connectivity
    pub const POOL: &'static str = "🏊"; // swap ingestion
    pub const GAS: &'static str = "⛽"; // gas price / gating
    pub const CLOCK: &'static str = "⏱️"; // execution cycle timing
    pub const SHUTDOWN: &'static str = "🛑"; // graceful shutdown
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SUCCESS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!("{} {}", $crate::logging::LogEmoji::ERROR, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!("{} {}", $crate::logging::LogEmoji::WARNING, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_search {
    ($($arg:tt)*) => {
        tracing::debug!("{} {}", $crate::logging::LogEmoji::SEARCH, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_pool {
    ($($arg:tt)*) => {
        tracing::debug!("{} {}", $crate::logging::LogEmoji::POOL, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_metrics {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::CHART, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_execution {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::EXECUTE, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_gas {
    ($($arg:tt)*) => {
        tracing::debug!("{} {}", $crate::logging::LogEmoji::GAS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_shutdown {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SHUTDOWN, format!($($arg)*))
    };
}
