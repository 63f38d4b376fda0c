use std::fmt::{self, Display, Formatter};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stock_symbol::Symbol;
use time::serde::rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl Display for OrderSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// A tradable symbol with a simulated price. `day_open` is the price at the
/// start of the current session and anchors percent-change display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub name: String,
    pub price: Decimal,
    pub day_open: Decimal,
}

impl Instrument {
    pub fn new(symbol: Symbol, name: String, initial_price: Decimal) -> Self {
        Self {
            symbol,
            name,
            price: initial_price,
            day_open: initial_price,
        }
    }

    pub fn pct_change_from_open(&self) -> Decimal {
        (self.price - self.day_open) / self.day_open * Decimal::ONE_HUNDRED
    }
}

/// The account's position in one instrument. `avg_cost` is the weighted
/// average purchase price, recomputed on every buy and zeroed when the
/// position is fully closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: Symbol,
    pub shares: u32,
    pub avg_cost: Decimal,
}

impl Holding {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            shares: 0,
            avg_cost: Decimal::ZERO,
        }
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        Decimal::from(self.shares) * price
    }

    pub fn unrealized_plpc(&self, price: Decimal) -> Decimal {
        if self.avg_cost > Decimal::ZERO {
            (price - self.avg_cost) / self.avg_cost * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }
}

/// Immutable record of one executed order, including the cash balance that
/// resulted from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "rfc3339")]
    pub time: OffsetDateTime,
    pub side: OrderSide,
    pub symbol: Symbol,
    pub shares: u32,
    pub price: Decimal,
    pub cash_after: Decimal,
}

/// Snapshot of total account value (cash plus mark-to-market holdings) at a
/// point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePoint {
    #[serde(with = "rfc3339")]
    pub time: OffsetDateTime,
    pub total_value: Decimal,
}
