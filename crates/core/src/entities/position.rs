//! Net position per symbol, updated only from confirmed fills.
//!
//! The invariant the reconciler leans on: `net_quantity` always equals the
//! signed sum of all fills applied to this position.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Fill, Side};
use crate::identifiers::Symbol;

/// Net position for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Positive = long, negative = short
    pub net_quantity: Decimal,
    /// Volume-weighted entry price of the open quantity
    pub average_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            net_quantity: Decimal::ZERO,
            average_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.is_zero()
    }

    /// Apply a fill, returning the realized PnL this fill produced.
    ///
    /// Reducing fills realize PnL against the average entry price; adding
    /// fills re-weight it; a side flip restarts the average at the fill
    /// price. Commission is charged to realized PnL.
    pub fn apply_fill(&mut self, fill: &Fill) -> Decimal {
        let signed_qty = fill.signed_quantity();
        let mut realized = Decimal::ZERO;

        let reducing = (self.net_quantity > Decimal::ZERO && signed_qty < Decimal::ZERO)
            || (self.net_quantity < Decimal::ZERO && signed_qty > Decimal::ZERO);
        if reducing {
            let close_qty = signed_qty.abs().min(self.net_quantity.abs());
            realized = if self.net_quantity > Decimal::ZERO {
                close_qty * (fill.price - self.average_entry_price)
            } else {
                close_qty * (self.average_entry_price - fill.price)
            };
        }
        realized -= fill.commission;

        let new_quantity = self.net_quantity + signed_qty;
        if new_quantity.is_zero() {
            self.average_entry_price = Decimal::ZERO;
        } else if (self.net_quantity >= Decimal::ZERO && signed_qty > Decimal::ZERO)
            || (self.net_quantity <= Decimal::ZERO && signed_qty < Decimal::ZERO)
        {
            // Adding to position - weighted average
            let total_cost =
                self.net_quantity.abs() * self.average_entry_price + fill.quantity * fill.price;
            self.average_entry_price = total_cost / new_quantity.abs();
        } else if new_quantity.signum() != self.net_quantity.signum() {
            // Flipped sides - new average is the fill price
            self.average_entry_price = fill.price;
        }
        // Reducing without flipping keeps the average unchanged

        self.net_quantity = new_quantity;
        self.realized_pnl += realized;
        realized
    }

    /// Recompute unrealized PnL at a mark price
    pub fn mark(&mut self, mark_price: Decimal) {
        self.unrealized_pnl = if self.net_quantity.is_zero() {
            Decimal::ZERO
        } else if self.net_quantity > Decimal::ZERO {
            self.net_quantity * (mark_price - self.average_entry_price)
        } else {
            self.net_quantity.abs() * (self.average_entry_price - mark_price)
        };
    }

    /// Notional exposure at a mark price
    pub fn notional(&self, mark_price: Decimal) -> Decimal {
        self.net_quantity.abs() * mark_price
    }
}
