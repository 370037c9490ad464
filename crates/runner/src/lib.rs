//! Aegis Runner
//!
//! Assembles the trading core - store, event bus, execution adapter, risk
//! manager, order manager - and drives the worker loops: the signal
//! pipeline, the order-event consumer, the fill poller, the reconciliation
//! loop, and the kill-switch evaluator. Everything stops through one watch
//! channel.

pub mod bootstrap;
pub mod market;

pub use bootstrap::{CoreConfig, TradingCore};
pub use market::{MarketDataSource, StaticMarketData};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Oms(#[from] aegis_oms::Error),

    #[error(transparent)]
    Store(#[from] aegis_store::StoreError),

    #[error(transparent)]
    Bus(#[from] aegis_bus::BusError),
}

pub type Result<T> = std::result::Result<T, Error>;
