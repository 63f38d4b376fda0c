use std::collections::HashMap;

use entity::trading::{Holding, OrderSide, PerformancePoint, Transaction};
use rust_decimal::Decimal;
use serde::Serialize;
use stock_symbol::Symbol;
use time::OffsetDateTime;

use super::error::EngineError;
use super::market::Market;

/// Cash balance, holdings and the append-only transaction and performance
/// logs. Orders execute atomically: every precondition is checked before
/// the first mutation, so a rejected order leaves the account untouched.
///
/// All money amounts are `Decimal`, so balance arithmetic is exact and the
/// cash-sufficiency check needs no epsilon tolerance.
#[derive(Serialize)]
pub struct Account {
    cash: Decimal,
    holdings: HashMap<Symbol, Holding>,
    transactions: Vec<Transaction>,
    performance: Vec<PerformancePoint>,
}

impl Account {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash,
            holdings: HashMap::new(),
            transactions: Vec::new(),
            performance: Vec::new(),
        }
    }

    /// Rebuilds an account from persisted state, replacing nothing lazily:
    /// the restored logs and holdings are the account.
    pub fn restore(
        cash: Decimal,
        holdings: Vec<Holding>,
        transactions: Vec<Transaction>,
        performance: Vec<PerformancePoint>,
    ) -> Self {
        Self {
            cash,
            holdings: holdings
                .into_iter()
                .map(|holding| (holding.symbol, holding))
                .collect(),
            transactions,
            performance,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    pub fn holding(&self, symbol: Symbol) -> Option<&Holding> {
        self.holdings.get(&symbol)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn performance(&self) -> &[PerformancePoint] {
        &self.performance
    }

    /// Total value of the first recorded performance point; the baseline
    /// every later point's percent change is measured against.
    pub fn performance_baseline(&self) -> Option<Decimal> {
        self.performance.first().map(|point| point.total_value)
    }

    pub fn recent_transactions(&self, count: usize) -> &[Transaction] {
        let start = self.transactions.len().saturating_sub(count);
        &self.transactions[start..]
    }

    pub fn recent_performance(&self, count: usize) -> &[PerformancePoint] {
        let start = self.performance.len().saturating_sub(count);
        &self.performance[start..]
    }

    pub fn buy(
        &mut self,
        symbol: Symbol,
        shares: u32,
        market: &Market,
    ) -> Result<Transaction, EngineError> {
        if shares == 0 {
            return Err(EngineError::InvalidQuantity(shares));
        }

        let price = market.price(symbol)?;
        let cost = price * Decimal::from(shares);
        if cost > self.cash {
            return Err(EngineError::InsufficientCash {
                cost,
                cash: self.cash,
            });
        }

        // Preconditions hold; from here on every mutation applies
        let holding = self
            .holdings
            .entry(symbol)
            .or_insert_with(|| Holding::new(symbol));
        let total_cost = holding.avg_cost * Decimal::from(holding.shares) + cost;
        holding.shares += shares;
        holding.avg_cost = total_cost / Decimal::from(holding.shares);

        self.cash -= cost;

        let transaction = Transaction {
            time: OffsetDateTime::now_utc(),
            side: OrderSide::Buy,
            symbol,
            shares,
            price,
            cash_after: self.cash,
        };
        self.transactions.push(transaction.clone());

        Ok(transaction)
    }

    pub fn sell(
        &mut self,
        symbol: Symbol,
        shares: u32,
        market: &Market,
    ) -> Result<Transaction, EngineError> {
        if shares == 0 {
            return Err(EngineError::InvalidQuantity(shares));
        }

        let price = market.price(symbol)?;
        let holding = match self.holdings.get_mut(&symbol) {
            Some(holding) if holding.shares >= shares => holding,
            holding => {
                return Err(EngineError::InsufficientShares {
                    symbol,
                    requested: shares,
                    held: holding.map(|holding| holding.shares).unwrap_or(0),
                })
            }
        };

        let proceeds = price * Decimal::from(shares);

        holding.shares -= shares;
        if holding.shares == 0 {
            // Closed lot: no stale basis survives
            holding.avg_cost = Decimal::ZERO;
        }

        self.cash += proceeds;

        let transaction = Transaction {
            time: OffsetDateTime::now_utc(),
            side: OrderSide::Sell,
            symbol,
            shares,
            price,
            cash_after: self.cash,
        };
        self.transactions.push(transaction.clone());

        Ok(transaction)
    }

    /// Cash plus mark-to-market value of every holding. A held symbol the
    /// market no longer knows about is a broken invariant, not a user error.
    pub fn total_value(&self, market: &Market) -> Result<Decimal, EngineError> {
        let mut value = self.cash;

        for holding in self.holdings.values() {
            let price = market.price(holding.symbol).map_err(|_| {
                EngineError::Consistency(format!(
                    "held symbol {} is not present in the market",
                    holding.symbol
                ))
            })?;
            value += holding.market_value(price);
        }

        Ok(value)
    }

    pub fn record_performance(&mut self, market: &Market) -> Result<(), EngineError> {
        let total_value = self.total_value(market)?;
        self.performance.push(PerformancePoint {
            time: OffsetDateTime::now_utc(),
            total_value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::market::PriceModel;
    use entity::trading::Instrument;

    fn symbol(s: &str) -> Symbol {
        Symbol::from_str(s).unwrap()
    }

    fn dec(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn test_market() -> Market {
        let instruments = vec![
            Instrument::new(symbol("AAPL"), "Apple Inc.".to_owned(), dec(20000)),
            Instrument::new(symbol("TSLA"), "Tesla Inc.".to_owned(), dec(23000)),
        ];
        let model = PriceModel::with_seed(42, 0.005, dec(1));
        Market::from_instruments(instruments, model)
    }

    fn test_account() -> Account {
        Account::new(dec(1_000_000))
    }

    #[test]
    fn buy_debits_exact_cost_and_sets_basis() {
        let market = test_market();
        let mut account = test_account();

        let transaction = account.buy(symbol("AAPL"), 10, &market).unwrap();

        assert_eq!(account.cash(), dec(800_000));
        assert_eq!(transaction.cash_after, dec(800_000));
        let holding = account.holding(symbol("AAPL")).unwrap();
        assert_eq!(holding.shares, 10);
        assert_eq!(holding.avg_cost, dec(20000));
    }

    #[test]
    fn average_cost_is_the_weighted_average_over_buys() {
        let mut market = test_market();
        let mut account = test_account();

        account.buy(symbol("AAPL"), 10, &market).unwrap();
        market.set_price(symbol("AAPL"), dec(22000));
        account.buy(symbol("AAPL"), 5, &market).unwrap();

        let holding = account.holding(symbol("AAPL")).unwrap();
        assert_eq!(holding.shares, 15);
        assert_eq!(
            holding.avg_cost,
            (Decimal::from(10) * dec(20000) + Decimal::from(5) * dec(22000)) / Decimal::from(15)
        );
    }

    #[test]
    fn worked_scenario_ends_at_10050() {
        let mut market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.buy(aapl, 10, &market).unwrap();
        assert_eq!(account.cash(), dec(800_000));

        market.set_price(aapl, dec(22000));
        account.buy(aapl, 5, &market).unwrap();
        assert_eq!(account.cash(), dec(690_000));

        market.set_price(aapl, dec(21000));
        account.sell(aapl, 15, &market).unwrap();

        // 8,000 - 1,100 + 15 * 210 = 10,050
        assert_eq!(account.cash(), dec(1_005_000));
        let holding = account.holding(aapl).unwrap();
        assert_eq!(holding.shares, 0);
        assert_eq!(holding.avg_cost, Decimal::ZERO);
    }

    #[test]
    fn cash_and_value_conserved_across_buy_sell_pair_at_fixed_price() {
        let market = test_market();
        let mut account = test_account();
        let starting_cash = account.cash();

        account.buy(symbol("TSLA"), 7, &market).unwrap();
        assert_eq!(account.total_value(&market).unwrap(), starting_cash);
        account.sell(symbol("TSLA"), 7, &market).unwrap();

        assert_eq!(account.cash(), starting_cash);
        assert_eq!(account.total_value(&market).unwrap(), starting_cash);
    }

    #[test]
    fn share_count_is_the_net_of_executed_quantities() {
        let market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.buy(aapl, 10, &market).unwrap();
        account.sell(aapl, 3, &market).unwrap();
        account.buy(aapl, 4, &market).unwrap();
        account.sell(aapl, 6, &market).unwrap();

        assert_eq!(account.holding(aapl).unwrap().shares, 5);
        assert_eq!(account.transactions().len(), 4);
    }

    #[test]
    fn partial_sell_leaves_basis_untouched() {
        let market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.buy(aapl, 10, &market).unwrap();
        account.sell(aapl, 4, &market).unwrap();

        let holding = account.holding(aapl).unwrap();
        assert_eq!(holding.shares, 6);
        assert_eq!(holding.avg_cost, dec(20000));
    }

    #[test]
    fn closed_lot_resets_basis_and_rebuy_starts_fresh() {
        let mut market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.buy(aapl, 10, &market).unwrap();
        account.sell(aapl, 10, &market).unwrap();
        assert_eq!(account.holding(aapl).unwrap().avg_cost, Decimal::ZERO);

        market.set_price(aapl, dec(25000));
        account.buy(aapl, 2, &market).unwrap();

        let holding = account.holding(aapl).unwrap();
        assert_eq!(holding.shares, 2);
        assert_eq!(holding.avg_cost, dec(25000));
    }

    #[test]
    fn valuation_is_idempotent() {
        let market = test_market();
        let mut account = test_account();

        account.buy(symbol("AAPL"), 3, &market).unwrap();

        let first = account.total_value(&market).unwrap();
        let second = account.total_value(&market).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn selling_without_a_holding_is_insufficient_shares() {
        let market = test_market();
        let mut account = test_account();

        let result = account.sell(symbol("TSLA"), 5, &market);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientShares {
                requested: 5,
                held: 0,
                ..
            })
        ));
    }

    #[test]
    fn overselling_a_holding_is_insufficient_shares() {
        let market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.buy(aapl, 3, &market).unwrap();
        let cash_before = account.cash();

        let result = account.sell(aapl, 4, &market);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientShares {
                requested: 4,
                held: 3,
                ..
            })
        ));

        // No partial mutation on a rejected order
        assert_eq!(account.cash(), cash_before);
        assert_eq!(account.holding(aapl).unwrap().shares, 3);
        assert_eq!(account.transactions().len(), 1);
    }

    #[test]
    fn buy_beyond_available_cash_is_insufficient_cash() {
        let market = test_market();
        let mut account = test_account();

        // 51 * 200.00 = 10,200 > 10,000
        let result = account.buy(symbol("AAPL"), 51, &market);
        assert!(matches!(result, Err(EngineError::InsufficientCash { .. })));
        assert_eq!(account.cash(), dec(1_000_000));
        assert!(account.holding(symbol("AAPL")).is_none());
    }

    #[test]
    fn buy_spending_every_cent_is_allowed() {
        let market = test_market();
        let mut account = test_account();

        account.buy(symbol("AAPL"), 50, &market).unwrap();
        assert_eq!(account.cash(), Decimal::ZERO);
    }

    #[test]
    fn zero_share_orders_are_invalid() {
        let market = test_market();
        let mut account = test_account();

        assert!(matches!(
            account.buy(symbol("AAPL"), 0, &market),
            Err(EngineError::InvalidQuantity(0))
        ));
        assert!(matches!(
            account.sell(symbol("AAPL"), 0, &market),
            Err(EngineError::InvalidQuantity(0))
        ));
    }

    #[test]
    fn orders_for_unknown_symbols_are_rejected() {
        let market = test_market();
        let mut account = test_account();

        assert!(matches!(
            account.buy(symbol("ZZZZ"), 1, &market),
            Err(EngineError::UnknownSymbol(_))
        ));
        assert!(matches!(
            account.sell(symbol("ZZZZ"), 1, &market),
            Err(EngineError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn held_symbol_missing_from_market_is_a_consistency_violation() {
        let market = test_market();
        let mut account = test_account();
        account.buy(symbol("AAPL"), 1, &market).unwrap();

        let smaller_market = Market::from_instruments(
            vec![Instrument::new(
                symbol("TSLA"),
                "Tesla Inc.".to_owned(),
                dec(23000),
            )],
            PriceModel::with_seed(42, 0.005, dec(1)),
        );

        assert!(matches!(
            account.total_value(&smaller_market),
            Err(EngineError::Consistency(_))
        ));
    }

    #[test]
    fn performance_percent_change_is_measured_from_the_first_point() {
        let mut market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        account.record_performance(&market).unwrap();
        account.buy(aapl, 10, &market).unwrap();
        market.set_price(aapl, dec(21000));
        account.record_performance(&market).unwrap();
        market.set_price(aapl, dec(22000));
        account.record_performance(&market).unwrap();

        let baseline = account.performance_baseline().unwrap();
        assert_eq!(baseline, dec(1_000_000));

        let points = account.performance();
        assert_eq!(points.len(), 3);
        // +100 and +200 over a 10,000 baseline: +1% and +2% cumulative
        let pct = |value: Decimal| (value - baseline) / baseline * Decimal::ONE_HUNDRED;
        assert_eq!(pct(points[1].total_value), Decimal::ONE);
        assert_eq!(pct(points[2].total_value), Decimal::TWO);
    }

    #[test]
    fn recent_slices_return_the_tail_in_order() {
        let market = test_market();
        let mut account = test_account();
        let aapl = symbol("AAPL");

        for _ in 0..5 {
            account.buy(aapl, 1, &market).unwrap();
        }

        let recent = account.recent_transactions(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].cash_after, account.cash());

        assert_eq!(account.recent_transactions(100).len(), 5);
    }

    #[test]
    fn restore_round_trips_observable_state() {
        let market = test_market();
        let mut account = test_account();
        account.buy(symbol("AAPL"), 10, &market).unwrap();
        account.record_performance(&market).unwrap();

        let restored = Account::restore(
            account.cash(),
            account.holdings().cloned().collect(),
            account.transactions().to_vec(),
            account.performance().to_vec(),
        );

        assert_eq!(restored.cash(), account.cash());
        assert_eq!(
            restored.holding(symbol("AAPL")),
            account.holding(symbol("AAPL"))
        );
        assert_eq!(restored.transactions(), account.transactions());
        assert_eq!(restored.performance(), account.performance());
    }
}
