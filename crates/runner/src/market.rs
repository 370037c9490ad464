//! Market-data boundary.
//!
//! Market-data ingestion is outside the trading core; the pipeline only
//! needs enough context to size and price-check an intent. Live deployments
//! adapt their feed handler to this trait; tests and backtests use the
//! static implementation.

use aegis_core::Symbol;
use aegis_risk::MarketContext;
use dashmap::DashMap;

pub trait MarketDataSource: Send + Sync {
    /// Current evaluation context for a symbol, if the feed knows it
    fn context_for(&self, symbol: &Symbol) -> Option<MarketContext>;
}

/// Fixed per-symbol contexts, set by hand
#[derive(Default)]
pub struct StaticMarketData {
    contexts: DashMap<Symbol, MarketContext>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: impl Into<Symbol>, ctx: MarketContext) {
        self.contexts.insert(symbol.into(), ctx);
    }
}

impl MarketDataSource for StaticMarketData {
    fn context_for(&self, symbol: &Symbol) -> Option<MarketContext> {
        self.contexts.get(symbol).map(|entry| entry.clone())
    }
}
