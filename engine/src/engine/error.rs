use rust_decimal::Decimal;
use stock_symbol::Symbol;
use storage::StorageError;
use thiserror::Error;

/// Failure taxonomy for engine operations. Order-validation variants are
/// user errors and are reported without mutating any state; `Consistency`
/// indicates a broken internal invariant and is always logged loudly.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
    #[error("share count must be positive (got {0})")]
    InvalidQuantity(u32),
    #[error("insufficient cash: order costs {cost:.2} but only {cash:.2} is available")]
    InsufficientCash { cost: Decimal, cash: Decimal },
    #[error("insufficient shares: tried to sell {requested} {symbol} but holding {held}")]
    InsufficientShares {
        symbol: Symbol,
        requested: u32,
        held: u32,
    },
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),
    #[error("internal consistency violation: {0}")]
    Consistency(String),
}
