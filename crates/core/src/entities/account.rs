use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::identifiers::AccountId;

/// Point-in-time account view handed to the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    /// Cash balance excluding open-position PnL
    pub balance: Decimal,
    /// Balance plus unrealized PnL
    pub equity: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn new(account_id: impl Into<String>, equity: Decimal) -> Self {
        Self {
            account_id: AccountId::new(account_id),
            balance: equity,
            equity,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
        }
    }
}
