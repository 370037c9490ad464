//! Deterministic fill pricing for the paper and backtest brokers.
//!
//! Slippage and commission are small pluggable models configured per run.
//! For a fixed seed and identical inputs the produced fill sequence is
//! byte-for-byte reproducible, which backtest comparability depends on.

use aegis_core::Side;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// How simulated fills deviate from the touch price
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SlippageModel {
    /// Absolute price offset against the order
    Fixed(Decimal),
    /// Fraction of the quoted bid/ask spread
    SpreadFraction(Decimal),
    /// Impact proportional to participation (order qty / quote volume)
    VolumeProportional(Decimal),
}

/// How simulated commissions are charged
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum CommissionModel {
    /// Flat amount per trade
    PerTrade(Decimal),
    /// Amount per unit of quantity
    PerUnit(Decimal),
    /// Fraction of traded notional
    NotionalFraction(Decimal),
}

/// Fill-simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillConfig {
    pub slippage: SlippageModel,
    pub commission: CommissionModel,
    /// Largest quantity one quote can fill; excess rests as a partial
    pub max_fill_volume: Option<Decimal>,
    /// Extra uniformly-drawn noise in basis points, 0 disables
    pub noise_bps: u32,
    /// Seed for the noise stream
    pub seed: u64,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            slippage: SlippageModel::SpreadFraction(dec!(0.5)),
            commission: CommissionModel::NotionalFraction(dec!(0.0005)),
            max_fill_volume: None,
            noise_bps: 0,
            seed: 7,
        }
    }
}

/// Price/volume context one simulated fill executes against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: aegis_core::Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    /// Quantity available at the touch this tick, if known
    pub volume: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(symbol: impl Into<aegis_core::Symbol>, bid: Decimal, ask: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            volume: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / dec!(2)
    }
}

/// Computes fill prices, quantities, and commissions
pub struct FillEngine {
    config: FillConfig,
    rng: Mutex<StdRng>,
}

impl FillEngine {
    pub fn new(config: FillConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Price for filling `quantity` on `side` against `quote`, together
    /// with the signed slippage applied to the touch price.
    pub fn fill_price(&self, side: Side, quantity: Decimal, quote: &Quote) -> (Decimal, Decimal) {
        let touch = match side {
            Side::Buy => quote.ask,
            Side::Sell => quote.bid,
        };

        let impact = match self.config.slippage {
            SlippageModel::Fixed(offset) => offset,
            SlippageModel::SpreadFraction(fraction) => quote.spread() * fraction,
            SlippageModel::VolumeProportional(coefficient) => {
                let volume = quote.volume.unwrap_or(quantity).max(Decimal::ONE);
                coefficient * (quantity / volume) * touch
            }
        };

        let noise = if self.config.noise_bps > 0 {
            let bound = i64::from(self.config.noise_bps);
            let draw = self.rng.lock().unwrap().gen_range(-bound..=bound);
            touch * Decimal::from(draw) / dec!(10000)
        } else {
            Decimal::ZERO
        };

        // Slippage always moves the price against the order; noise can go
        // either way.
        let slippage = impact + noise;
        let price = match side {
            Side::Buy => touch + slippage,
            Side::Sell => touch - slippage,
        };
        (price, slippage)
    }

    /// Quantity this quote can fill out of `remaining`
    pub fn fill_quantity(&self, remaining: Decimal, quote: &Quote) -> Decimal {
        let mut quantity = remaining;
        if let Some(cap) = self.config.max_fill_volume {
            quantity = quantity.min(cap);
        }
        if let Some(volume) = quote.volume {
            quantity = quantity.min(volume);
        }
        quantity
    }

    /// Commission charged for a fill
    pub fn commission(&self, quantity: Decimal, price: Decimal) -> Decimal {
        match self.config.commission {
            CommissionModel::PerTrade(amount) => amount,
            CommissionModel::PerUnit(amount) => amount * quantity,
            CommissionModel::NotionalFraction(fraction) => fraction * quantity * price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> Quote {
        Quote::new("EURUSD", dec!(1.1000), dec!(1.1002))
    }

    #[test]
    fn test_fixed_slippage_moves_against_order() {
        let engine = FillEngine::new(FillConfig {
            slippage: SlippageModel::Fixed(dec!(0.0001)),
            commission: CommissionModel::PerTrade(Decimal::ZERO),
            max_fill_volume: None,
            noise_bps: 0,
            seed: 1,
        });

        let (buy_price, slip) = engine.fill_price(Side::Buy, dec!(1), &quote());
        assert_eq!(buy_price, dec!(1.1003));
        assert_eq!(slip, dec!(0.0001));

        let (sell_price, _) = engine.fill_price(Side::Sell, dec!(1), &quote());
        assert_eq!(sell_price, dec!(1.0999));
    }

    #[test]
    fn test_spread_fraction_slippage() {
        let engine = FillEngine::new(FillConfig {
            slippage: SlippageModel::SpreadFraction(dec!(0.5)),
            commission: CommissionModel::PerTrade(Decimal::ZERO),
            max_fill_volume: None,
            noise_bps: 0,
            seed: 1,
        });

        // Spread 0.0002, half = 0.0001
        let (price, slip) = engine.fill_price(Side::Buy, dec!(1), &quote());
        assert_eq!(slip, dec!(0.0001));
        assert_eq!(price, dec!(1.1003));
    }

    #[test]
    fn test_volume_proportional_scales_with_participation() {
        let engine = FillEngine::new(FillConfig {
            slippage: SlippageModel::VolumeProportional(dec!(0.001)),
            commission: CommissionModel::PerTrade(Decimal::ZERO),
            max_fill_volume: None,
            noise_bps: 0,
            seed: 1,
        });

        let q = quote().with_volume(dec!(100));
        let (_, small) = engine.fill_price(Side::Buy, dec!(1), &q);
        let (_, large) = engine.fill_price(Side::Buy, dec!(50), &q);
        assert!(large > small);
    }

    #[test]
    fn test_commission_models() {
        let per_trade = FillEngine::new(FillConfig {
            commission: CommissionModel::PerTrade(dec!(2)),
            ..FillConfig::default()
        });
        assert_eq!(per_trade.commission(dec!(5), dec!(100)), dec!(2));

        let per_unit = FillEngine::new(FillConfig {
            commission: CommissionModel::PerUnit(dec!(0.1)),
            ..FillConfig::default()
        });
        assert_eq!(per_unit.commission(dec!(5), dec!(100)), dec!(0.5));

        let notional = FillEngine::new(FillConfig {
            commission: CommissionModel::NotionalFraction(dec!(0.001)),
            ..FillConfig::default()
        });
        assert_eq!(notional.commission(dec!(5), dec!(100)), dec!(0.5));
    }

    #[test]
    fn test_volume_cap_limits_fill_quantity() {
        let engine = FillEngine::new(FillConfig {
            max_fill_volume: Some(dec!(3)),
            ..FillConfig::default()
        });
        assert_eq!(engine.fill_quantity(dec!(10), &quote()), dec!(3));
        assert_eq!(engine.fill_quantity(dec!(2), &quote()), dec!(2));

        // Quote volume caps further
        let thin = quote().with_volume(dec!(1));
        assert_eq!(engine.fill_quantity(dec!(10), &thin), dec!(1));
    }

    #[test]
    fn test_noise_is_reproducible_for_a_seed() {
        let make = || {
            FillEngine::new(FillConfig {
                slippage: SlippageModel::Fixed(Decimal::ZERO),
                commission: CommissionModel::PerTrade(Decimal::ZERO),
                max_fill_volume: None,
                noise_bps: 5,
                seed: 42,
            })
        };

        let a = make();
        let b = make();
        for _ in 0..10 {
            let (pa, _) = a.fill_price(Side::Buy, dec!(1), &quote());
            let (pb, _) = b.fill_price(Side::Buy, dec!(1), &quote());
            assert_eq!(pa, pb);
        }
    }
}
