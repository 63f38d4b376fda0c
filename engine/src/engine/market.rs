use std::collections::HashMap;

use common::util;
use entity::trading::Instrument;
use log::warn;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use serde::Serialize;
use stock_symbol::Symbol;

use super::error::EngineError;

const FALLBACK_VOLATILITY: f64 = 0.005;

/// Random-walk price process. Each tick draws a percentage move from
/// `Normal(0, volatility)`, applies it multiplicatively and clamps the
/// result to a strictly positive floor so downstream percentage math never
/// divides by zero.
pub struct PriceModel {
    rng: StdRng,
    pct_move: Normal<f64>,
    floor: Decimal,
}

impl PriceModel {
    pub fn new(volatility: f64, floor: Decimal) -> Self {
        Self::with_rng(StdRng::from_entropy(), volatility, floor)
    }

    pub fn with_seed(seed: u64, volatility: f64, floor: Decimal) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), volatility, floor)
    }

    fn with_rng(rng: StdRng, volatility: f64, floor: Decimal) -> Self {
        let pct_move = Normal::new(0.0, volatility).unwrap_or_else(|_| {
            warn!("Invalid tick volatility {volatility}, using {FALLBACK_VOLATILITY}");
            Normal::new(0.0, FALLBACK_VOLATILITY).unwrap()
        });

        Self {
            rng,
            pct_move,
            floor: Decimal::max(floor, Decimal::new(1, 28)),
        }
    }

    pub fn tick(&mut self, instrument: &mut Instrument) -> Decimal {
        let factor = 1.0 + self.pct_move.sample(&mut self.rng);
        match util::f64_to_decimal(factor) {
            Ok(factor) => {
                instrument.price = Decimal::max(self.floor, instrument.price * factor);
            }
            Err(error) => warn!("Skipping price move for {}: {error}", instrument.symbol),
        }

        instrument.price
    }
}

/// The set of tradable instruments, kept in insertion order for display.
/// The account only ever reads prices from the market; all mutation happens
/// through ticks and session resets.
#[derive(Serialize)]
pub struct Market {
    instruments: Vec<Instrument>,
    #[serde(skip)]
    index: HashMap<Symbol, usize>,
    #[serde(skip)]
    model: PriceModel,
}

impl Market {
    /// Single construction path, used both at fresh initialization and when
    /// restoring persisted state. The price RNG is never persisted; the
    /// caller hands in a freshly initialized model instead.
    pub fn from_instruments(instruments: Vec<Instrument>, model: PriceModel) -> Self {
        let index = instruments
            .iter()
            .enumerate()
            .map(|(position, instrument)| (instrument.symbol, position))
            .collect();

        Self {
            instruments,
            index,
            model,
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instrument(&self, symbol: Symbol) -> Result<&Instrument, EngineError> {
        self.index
            .get(&symbol)
            .map(|&position| &self.instruments[position])
            .ok_or(EngineError::UnknownSymbol(symbol))
    }

    pub fn price(&self, symbol: Symbol) -> Result<Decimal, EngineError> {
        self.instrument(symbol).map(|instrument| instrument.price)
    }

    /// Advances every instrument one tick, in stored order. Callable
    /// repeatedly; the RNG stream carries over between calls.
    pub fn tick_all(&mut self) {
        let model = &mut self.model;
        for instrument in &mut self.instruments {
            model.tick(instrument);
        }
    }

    /// Starts a new session: every instrument's open price becomes its
    /// current price, resetting the percent-change-from-open baseline.
    pub fn new_session(&mut self) {
        for instrument in &mut self.instruments {
            instrument.day_open = instrument.price;
        }
    }

    pub fn snapshot(&self) -> Vec<Instrument> {
        self.instruments.clone()
    }

    #[cfg(test)]
    pub fn set_price(&mut self, symbol: Symbol, price: Decimal) {
        let position = self.index[&symbol];
        self.instruments[position].price = price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(s: &str) -> Symbol {
        Symbol::from_str(s).unwrap()
    }

    fn test_market(seed: u64) -> Market {
        let instruments = vec![
            Instrument::new(symbol("AAPL"), "Apple Inc.".to_owned(), Decimal::new(20000, 2)),
            Instrument::new(symbol("TSLA"), "Tesla Inc.".to_owned(), Decimal::new(23000, 2)),
        ];
        let model = PriceModel::with_seed(seed, 0.005, Decimal::new(1, 2));
        Market::from_instruments(instruments, model)
    }

    #[test]
    fn prices_stay_strictly_positive() {
        // Absurd volatility forces the clamp to engage
        let instruments = vec![Instrument::new(
            symbol("AAPL"),
            "Apple Inc.".to_owned(),
            Decimal::new(5, 2),
        )];
        let model = PriceModel::with_seed(7, 5.0, Decimal::new(1, 2));
        let mut market = Market::from_instruments(instruments, model);

        for _ in 0..1000 {
            market.tick_all();
            assert!(market.instruments()[0].price >= Decimal::new(1, 2));
        }
    }

    #[test]
    fn same_seed_produces_same_walk() {
        let mut a = test_market(42);
        let mut b = test_market(42);

        for _ in 0..50 {
            a.tick_all();
            b.tick_all();
        }

        assert_eq!(a.instruments(), b.instruments());
    }

    #[test]
    fn ticks_move_prices_without_reset_between_calls() {
        let mut market = test_market(42);
        let initial = market.snapshot();

        market.tick_all();
        market.tick_all();
        market.tick_all();

        assert_ne!(market.instruments(), &initial[..]);
        // Session opens are untouched by ticks
        for (before, after) in initial.iter().zip(market.instruments()) {
            assert_eq!(before.day_open, after.day_open);
        }
    }

    #[test]
    fn new_session_rebases_percent_change() {
        let mut market = test_market(42);
        for _ in 0..20 {
            market.tick_all();
        }

        market.new_session();

        for instrument in market.instruments() {
            assert_eq!(instrument.day_open, instrument.price);
            assert_eq!(instrument.pct_change_from_open(), Decimal::ZERO);
        }
    }

    #[test]
    fn pct_change_from_open_math() {
        let mut market = test_market(42);
        market.set_price(symbol("AAPL"), Decimal::new(22000, 2));

        let change = market.instrument(symbol("AAPL")).unwrap().pct_change_from_open();
        assert_eq!(change, Decimal::new(10, 0));
    }

    #[test]
    fn unknown_symbol_is_a_lookup_failure() {
        let market = test_market(42);
        assert!(matches!(
            market.price(symbol("ZZZZ")),
            Err(EngineError::UnknownSymbol(_))
        ));
    }
}
