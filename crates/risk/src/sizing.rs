//! Position sizing.
//!
//! A closed set of sizing methods dispatched through one function. Every
//! result passes the same caps, and a capped size records why, so the
//! decision trail survives into logs and reports.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sizing method selected per strategy/configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SizingMethod {
    /// Constant quantity
    FixedUnits { units: Decimal },
    /// Quantity = configured amount / entry price
    FixedAmount { amount: Decimal },
    /// Notional sized to a fraction of equity
    PercentEquity { fraction: Decimal },
    /// Quantity such that stop distance * quantity <= risk fraction * equity
    PercentRisk { risk_fraction: Decimal },
    /// Percent-risk with the stop distance derived from ATR
    AtrBased {
        risk_fraction: Decimal,
        atr_multiplier: Decimal,
    },
    /// Fraction of full Kelly from historical win rate and payoff ratio
    KellyFractional { fraction: Decimal },
}

/// Market/account inputs a sizing method draws from
#[derive(Debug, Clone)]
pub struct SizingInputs {
    pub equity: Decimal,
    pub entry_price: Decimal,
    /// Price distance to the protective stop
    pub stop_distance: Decimal,
    /// Account-currency value of one price unit per unit of quantity
    pub point_value: Decimal,
    pub atr: Option<Decimal>,
    pub win_rate: Option<Decimal>,
    /// Average win / average loss
    pub payoff_ratio: Option<Decimal>,
}

impl SizingInputs {
    pub fn new(equity: Decimal, entry_price: Decimal, stop_distance: Decimal) -> Self {
        Self {
            equity,
            entry_price,
            stop_distance,
            point_value: Decimal::ONE,
            atr: None,
            win_rate: None,
            payoff_ratio: None,
        }
    }
}

/// Caps applied to every sizing result
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SizingCaps {
    /// Risk per trade never exceeds this fraction of equity
    pub max_risk_per_trade: Decimal,
    pub max_units: Option<Decimal>,
}

impl Default for SizingCaps {
    fn default() -> Self {
        Self {
            max_risk_per_trade: dec!(0.02),
            max_units: None,
        }
    }
}

/// A computed position size
#[derive(Debug, Clone)]
pub struct PositionSize {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub risk_amount: Decimal,
    /// Risk as a fraction of equity
    pub risk_fraction: Decimal,
    /// Stop distance the size was computed against
    pub stop_distance: Decimal,
    /// Why the raw size was reduced, when it was
    pub cap_reason: Option<&'static str>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizingError {
    #[error("entry price must be positive, got {0}")]
    InvalidEntryPrice(Decimal),

    #[error("stop distance must be positive, got {0}")]
    InvalidStopDistance(Decimal),

    #[error("ATR-based sizing requires an ATR value")]
    MissingAtr,

    #[error("Kelly sizing requires win rate and payoff ratio")]
    MissingKellyInputs,
}

/// Compute a position size for `method`, then apply `caps`.
pub fn size_position(
    method: SizingMethod,
    inputs: &SizingInputs,
    caps: &SizingCaps,
) -> Result<PositionSize, SizingError> {
    if inputs.entry_price <= Decimal::ZERO {
        return Err(SizingError::InvalidEntryPrice(inputs.entry_price));
    }

    let sized = match method {
        SizingMethod::FixedUnits { units } => {
            from_quantity(units.max(Decimal::ZERO), inputs.stop_distance, inputs)
        }
        SizingMethod::FixedAmount { amount } => {
            let quantity = amount.max(Decimal::ZERO) / inputs.entry_price;
            from_quantity(quantity, inputs.stop_distance, inputs)
        }
        SizingMethod::PercentEquity { fraction } => {
            let notional = inputs.equity * fraction.max(Decimal::ZERO);
            from_quantity(notional / inputs.entry_price, inputs.stop_distance, inputs)
        }
        SizingMethod::PercentRisk { risk_fraction } => {
            percent_risk(risk_fraction, inputs.stop_distance, inputs)?
        }
        SizingMethod::AtrBased {
            risk_fraction,
            atr_multiplier,
        } => {
            let atr = inputs.atr.ok_or(SizingError::MissingAtr)?;
            let stop_distance = atr * atr_multiplier.max(dec!(0.1));
            percent_risk(risk_fraction, stop_distance, inputs)?
        }
        SizingMethod::KellyFractional { fraction } => {
            let win_rate = inputs.win_rate.ok_or(SizingError::MissingKellyInputs)?;
            let payoff = inputs.payoff_ratio.ok_or(SizingError::MissingKellyInputs)?;
            kelly_fractional(win_rate, payoff, fraction, inputs)?
        }
    };

    Ok(apply_caps(sized, inputs, caps))
}

fn from_quantity(quantity: Decimal, stop_distance: Decimal, inputs: &SizingInputs) -> PositionSize {
    let risk_amount = quantity * stop_distance * inputs.point_value;
    PositionSize {
        quantity,
        notional: quantity * inputs.entry_price,
        risk_amount,
        risk_fraction: if inputs.equity > Decimal::ZERO {
            risk_amount / inputs.equity
        } else {
            Decimal::ZERO
        },
        stop_distance,
        cap_reason: None,
    }
}

fn percent_risk(
    risk_fraction: Decimal,
    stop_distance: Decimal,
    inputs: &SizingInputs,
) -> Result<PositionSize, SizingError> {
    if stop_distance <= Decimal::ZERO {
        return Err(SizingError::InvalidStopDistance(stop_distance));
    }
    let risk_amount = inputs.equity.max(Decimal::ZERO) * risk_fraction.max(Decimal::ZERO);
    let quantity = risk_amount / (stop_distance * inputs.point_value);
    Ok(from_quantity(quantity, stop_distance, inputs))
}

fn kelly_fractional(
    win_rate: Decimal,
    payoff_ratio: Decimal,
    fraction: Decimal,
    inputs: &SizingInputs,
) -> Result<PositionSize, SizingError> {
    let p = win_rate.clamp(Decimal::ZERO, Decimal::ONE);
    let ratio = payoff_ratio.max(dec!(0.000001));
    let full_kelly = (p * (ratio + Decimal::ONE) - Decimal::ONE) / ratio;
    if full_kelly <= Decimal::ZERO {
        // Negative expectancy: no bet
        return Ok(from_quantity(Decimal::ZERO, inputs.stop_distance, inputs));
    }
    let effective = (full_kelly * fraction.max(Decimal::ZERO)).clamp(Decimal::ZERO, Decimal::ONE);
    percent_risk(effective, inputs.stop_distance, inputs)
}

fn apply_caps(mut size: PositionSize, inputs: &SizingInputs, caps: &SizingCaps) -> PositionSize {
    let mut quantity = size.quantity;
    let mut cap_reason = size.cap_reason;

    let max_risk = inputs.equity * caps.max_risk_per_trade;
    if inputs.equity > Decimal::ZERO && size.risk_amount > max_risk && size.risk_amount > Decimal::ZERO {
        quantity *= max_risk / size.risk_amount;
        cap_reason = cap_reason.or(Some("max_risk_per_trade"));
    }

    if let Some(max_units) = caps.max_units
        && quantity > max_units
    {
        quantity = max_units;
        cap_reason = cap_reason.or(Some("max_units"));
    }

    if quantity != size.quantity {
        let capped = from_quantity(quantity, size.stop_distance, inputs);
        size = PositionSize {
            cap_reason,
            ..capped
        };
    }
    size
}
