//! Identifier newtypes and idempotency-key derivation.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Instrument symbol, e.g. "EURUSD" or "BTC-USD"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trading account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-assigned order identifier, unknown until the broker acknowledges
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerOrderId(pub String);

impl BrokerOrderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic key preventing duplicate broker submissions for one
/// logical order intent.
///
/// Two signals describing the same intent (same symbol, strategy, broker,
/// and signal minute) derive the same key, so retries and duplicate
/// deliveries coalesce into a single broker order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Derive a key from the components that define one order intent.
    ///
    /// The signal timestamp is truncated to the minute so that the same
    /// signal re-emitted with sub-minute jitter still maps to one key.
    pub fn derive(
        symbol: &Symbol,
        strategy_id: &str,
        signal_ts: DateTime<Utc>,
        broker_id: &str,
    ) -> Self {
        let minute_ts = signal_ts
            .with_second(0)
            .and_then(|ts| ts.with_nanosecond(0))
            .unwrap_or(signal_ts);
        let raw = format!(
            "{}|{}|{}|{}",
            symbol.as_str(),
            strategy_id,
            minute_ts.to_rfc3339(),
            broker_id
        );
        let digest = Sha256::digest(raw.as_bytes());
        Self(hex::encode(&digest[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_is_deterministic() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let a = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", ts, "paper");
        let b = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", ts, "paper");
        assert_eq!(a, b);
    }

    #[test]
    fn key_ignores_sub_minute_jitter() {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let jittered = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 41).unwrap();
        let a = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", base, "paper");
        let b = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", jittered, "paper");
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_across_components() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let base = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", ts, "paper");
        let other_symbol = IdempotencyKey::derive(&Symbol::from("GBPUSD"), "trend-1", ts, "paper");
        let other_strategy = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-2", ts, "paper");
        let other_broker = IdempotencyKey::derive(&Symbol::from("EURUSD"), "trend-1", ts, "live");
        assert_ne!(base, other_symbol);
        assert_ne!(base, other_strategy);
        assert_ne!(base, other_broker);
    }
}
