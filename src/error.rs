//! Typed error kinds for the AutoTrader engine.
//!
//! Configuration errors are fatal and surfaced at construction time.
//! Transient and permanent I/O errors from data sources never propagate as
//! scan failures — they degrade confidence and mark features missing
//! instead (see `orchestrator` and `ingestion::client`).

use std::fmt;

/// Fatal, startup-time configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Feature weights did not sum to 1.0 within tolerance.
    WeightSumInvariant { sum: f64, tolerance: f64 },
    /// A feature weight was negative.
    NegativeWeight { name: String, weight: f64 },
    /// An alert rule condition referenced a metric name that is not a
    /// recognized weight or a known derived metric.
    UnknownMetric { rule_id: String, metric: String },
    /// An alert rule's condition tree failed to parse.
    UnparseableCondition { rule_id: String, detail: String },
    /// Two rules in the same rule set share an id.
    DuplicateRuleId { rule_id: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::WeightSumInvariant { sum, tolerance } => write!(
                f,
                "feature weights must sum to 1.0 (+/- {tolerance}), got {sum}"
            ),
            ConfigError::NegativeWeight { name, weight } => {
                write!(f, "feature weight '{name}' must be non-negative, got {weight}")
            }
            ConfigError::UnknownMetric { rule_id, metric } => {
                write!(f, "rule '{rule_id}' references unknown metric '{metric}'")
            }
            ConfigError::UnparseableCondition { rule_id, detail } => {
                write!(f, "rule '{rule_id}' has an unparseable condition: {detail}")
            }
            ConfigError::DuplicateRuleId { rule_id } => {
                write!(f, "duplicate alert rule id '{rule_id}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors from a single data-source fetch (C2).
///
/// `CircuitOpen` and `Upstream5xx` are treated by the orchestrator as a
/// missing feature family with reduced confidence; they never panic a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    CircuitOpen,
    RateLimited,
    Timeout,
    Transport(String),
    Upstream4xx { code: u16 },
    Upstream5xx { code: u16 },
    Decode(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::CircuitOpen => write!(f, "circuit open"),
            FetchError::RateLimited => write!(f, "rate limited"),
            FetchError::Timeout => write!(f, "timed out"),
            FetchError::Transport(detail) => write!(f, "transport error: {detail}"),
            FetchError::Upstream4xx { code } => write!(f, "upstream 4xx: {code}"),
            FetchError::Upstream5xx { code } => write!(f, "upstream 5xx: {code}"),
            FetchError::Decode(detail) => write!(f, "decode error: {detail}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Whether this failure kind counts against the circuit breaker
    /// (`Timeout`, `RateLimited`, `Transport`, `Upstream5xx` only; business
    /// 4xx responses are not breaker failures per spec §4.1).
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::RateLimited
                | FetchError::Transport(_)
                | FetchError::Upstream5xx { .. }
        )
    }
}

/// Errors surfaced by the outbox after exhausting retries.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxError {
    /// Delivery failed `max_attempts` times; the entry is now terminally
    /// `Failed` and will not be retried further.
    MaxAttemptsExceeded { entry_id: String, attempts: u32 },
    /// The channel named by an entry has no registered sender.
    UnknownChannel { channel: String },
}

impl fmt::Display for OutboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxError::MaxAttemptsExceeded { entry_id, attempts } => write!(
                f,
                "outbox entry '{entry_id}' failed after {attempts} attempts"
            ),
            OutboxError::UnknownChannel { channel } => {
                write!(f, "no sender registered for channel '{channel}'")
            }
        }
    }
}

impl std::error::Error for OutboxError {}

/// Top-level engine error used for anything that should abort a scan
/// outright: fatal configuration errors and unrecoverable storage errors.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Store(anyhow::Error),
    /// The outer scan deadline elapsed before scoring completed.
    ScanTimeout { token: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(e) => write!(f, "configuration error: {e}"),
            EngineError::Store(e) => write!(f, "storage error: {e}"),
            EngineError::ScanTimeout { token } => write!(f, "scan timed out for token '{token}'"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Store(e) => Some(e.as_ref()),
            EngineError::ScanTimeout { .. } => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// Exit taxonomy surfaced to a host CLI (spec §6.5). The engine itself never
/// calls `std::process::exit`; this is a pure classification helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Ok = 0,
    Config = 1,
    Input = 2,
    Runtime = 10,
    Timeout = 20,
    Locked = 21,
    Validation = 30,
    Interrupted = 130,
}

impl From<&EngineError> for ExitCode {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Config(_) => ExitCode::Config,
            EngineError::Store(_) => ExitCode::Runtime,
            EngineError::ScanTimeout { .. } => ExitCode::Timeout,
        }
    }
}
