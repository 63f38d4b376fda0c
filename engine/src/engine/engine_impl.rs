use std::{
    fs,
    io::{self, Cursor, Write},
    path::PathBuf,
};

use common::{config::Config, util};
use entity::trading::Instrument;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use storage::SaveData;
use time::OffsetDateTime;

use crate::event::{ClockEvent, Command, EngineEvent, EventReceiver};

use super::{account::Account, market::Market, market::PriceModel, EngineError};

#[derive(Serialize)]
pub struct Engine {
    market: Market,
    account: Account,
}

pub async fn run(events: EventReceiver) {
    let mut engine = match Engine::new() {
        Ok(engine) => engine,
        Err(error) => {
            error!("Failed to initialize engine: {error:?}");
            return;
        }
    };

    info!(
        "Sandbox ready. Starting cash: {:.2}. Type \"help\" for commands.",
        engine.account.cash()
    );

    engine.run(events).await;

    // Opportunistic save on the way out; a failure here only costs the
    // session, so log it and move on
    if let Err(error) = engine.save(None).await {
        warn!("Failed to auto-save on exit: {error}");
    }
}

impl Engine {
    fn new() -> anyhow::Result<Self> {
        let config = Config::get();

        let instruments = config
            .market
            .instruments
            .iter()
            .map(|seed| Instrument::new(seed.symbol, seed.name.clone(), seed.price))
            .collect();
        let mut market = Market::from_instruments(instruments, Self::price_model());
        market.new_session();

        let mut account = Account::new(config.trading.starting_cash);
        // Baseline point for all percent-change reporting
        account.record_performance(&market)?;

        Ok(Self { market, account })
    }

    fn price_model() -> PriceModel {
        let config = &Config::get().market;
        PriceModel::new(config.tick_volatility, config.price_floor)
    }

    async fn run(&mut self, mut events: EventReceiver) {
        loop {
            match events.next().await {
                EngineEvent::Clock(ClockEvent::Tick) => self.on_tick(),
                EngineEvent::Command(command) => {
                    if matches!(command, Command::Stop) {
                        return;
                    }

                    self.handle_command(command).await;
                }
            }
        }
    }

    fn on_tick(&mut self) {
        self.market.tick_all();

        if let Err(error) = self.account.record_performance(&self.market) {
            error!("Failed to record performance point: {error}");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Market => {
                if let Err(error) = self.log_market() {
                    error!("Failed to render market data: {error:?}");
                }
            }
            Command::Buy { symbol, shares } => {
                match self.account.buy(symbol, shares, &self.market) {
                    Ok(transaction) => info!(
                        "Bought {} {} @ {:.2}. Cash now: {:.2}",
                        transaction.shares, transaction.symbol, transaction.price, transaction.cash_after
                    ),
                    Err(error) => warn!("Buy rejected: {error}"),
                }
            }
            Command::Sell { symbol, shares } => {
                match self.account.sell(symbol, shares, &self.market) {
                    Ok(transaction) => info!(
                        "Sold {} {} @ {:.2}. Cash now: {:.2}",
                        transaction.shares, transaction.symbol, transaction.price, transaction.cash_after
                    ),
                    Err(error) => warn!("Sell rejected: {error}"),
                }
            }
            Command::Portfolio => {
                if let Err(error) = self.log_portfolio() {
                    error!("Failed to render portfolio: {error:?}");
                }
            }
            Command::Transactions { count } => {
                let count = count.unwrap_or(Config::get().trading.recent_transactions);
                if let Err(error) = self.log_transactions(count) {
                    error!("Failed to render transactions: {error:?}");
                }
            }
            Command::Performance { count } => {
                let count = count.unwrap_or(Config::get().trading.recent_performance);
                if let Err(error) = self.log_performance(count) {
                    error!("Failed to render performance: {error:?}");
                }
            }
            Command::Tick { count } => {
                for _ in 0..count {
                    self.on_tick();
                }
                info!("Advanced the market {count} tick(s)");
            }
            Command::NewSession => {
                self.market.new_session();
                info!("Started a new session; open prices rebased to current prices");
            }
            Command::EngineDump => {
                let json = match serde_json::to_string_pretty(self) {
                    Ok(json) => json,
                    Err(error) => {
                        error!("Failed to dump engine state to json: {error:?}");
                        return;
                    }
                };

                if let Err(error) = fs::write("engine.json", &json) {
                    error!("Failed to write JSON to file, writing to console instead. {error:?}");
                    info!("{json}");
                }
            }
            Command::Save { file } => match self.save(file.as_deref()).await {
                Ok(path) => info!("Saved to {}", path.display()),
                Err(error) => error!("Save failed: {error}"),
            },
            Command::Load { file } => match self.load(file.as_deref()).await {
                Ok(path) => info!("Loaded from {}", path.display()),
                Err(error) => error!("Load failed: {error}"),
            },
            Command::Status => {
                if let Err(error) = self.log_status() {
                    error!("Failed to render status: {error:?}");
                }
            }
            Command::Stop => {
                warn!(
                    "Stop command passed to command handler - this should have been handled externally"
                );
            }
        }
    }

    async fn save(&self, file: Option<&str>) -> Result<PathBuf, EngineError> {
        let path = save_path(file);

        let data = SaveData {
            instruments: self.market.snapshot(),
            cash: self.account.cash(),
            holdings: self.account.holdings().cloned().collect(),
            transactions: self.account.transactions().to_vec(),
            performance: self.account.performance().to_vec(),
        };
        storage::save(&path, &data).await?;

        Ok(path)
    }

    /// Replaces the in-memory market and account wholesale with the
    /// restored bundle. The price RNG stream is not part of the bundle, so
    /// the rebuilt market gets a freshly seeded model.
    async fn load(&mut self, file: Option<&str>) -> Result<PathBuf, EngineError> {
        let path = save_path(file);
        let data = storage::load(&path).await?;

        self.market = Market::from_instruments(data.instruments, Self::price_model());
        self.account = Account::restore(
            data.cash,
            data.holdings,
            data.transactions,
            data.performance,
        );

        Ok(path)
    }

    fn log_market(&self) -> io::Result<()> {
        let mut buf = Cursor::new(Vec::<u8>::with_capacity(256));

        write!(buf, "{:<6} {:<18} {:>12} {:>9}", "SYM", "NAME", "PRICE", "CHG%")?;
        for instrument in self.market.instruments() {
            write!(
                buf,
                "\n{:<6} {:<18} {:>12.2} {:>+8.2}%",
                instrument.symbol,
                truncate(&instrument.name, 18),
                instrument.price,
                instrument.pct_change_from_open(),
            )?;
        }

        log_buffer("Market Data", buf);
        Ok(())
    }

    fn log_portfolio(&self) -> io::Result<()> {
        let mut buf = Cursor::new(Vec::<u8>::with_capacity(256));

        writeln!(buf, "Cash: {:.2}", self.account.cash())?;
        write!(
            buf,
            "{:<6} {:>8} {:>10} {:>12} {:>12} {:>9}",
            "SYM", "SHARES", "AVG COST", "PRICE", "MKT VALUE", "P/L%"
        )?;

        let mut holdings = self.account.holdings().collect::<Vec<_>>();
        holdings.sort_unstable_by_key(|holding| holding.symbol);

        for holding in holdings {
            let price = match self.market.price(holding.symbol) {
                Ok(price) => price,
                Err(_) => {
                    error!(
                        "Internal consistency violation: held symbol {} is not in the market",
                        holding.symbol
                    );
                    continue;
                }
            };

            write!(
                buf,
                "\n{:<6} {:>8} {:>10.2} {:>12.2} {:>12.2} {:>+8.2}%",
                holding.symbol,
                holding.shares,
                holding.avg_cost,
                price,
                holding.market_value(price),
                holding.unrealized_plpc(price),
            )?;
        }

        match self.account.total_value(&self.market) {
            Ok(total) => write!(buf, "\nTotal Value: {total:.2}")?,
            Err(error) => error!("{error}"),
        }

        log_buffer("Portfolio", buf);
        Ok(())
    }

    fn log_transactions(&self, count: usize) -> io::Result<()> {
        let transactions = self.account.recent_transactions(count);
        if transactions.is_empty() {
            info!("No transactions recorded yet");
            return Ok(());
        }

        let mut buf = Cursor::new(Vec::<u8>::with_capacity(256));
        let mut first = true;

        for transaction in transactions.iter().rev() {
            if !first {
                writeln!(buf)?;
            }
            first = false;

            write!(
                buf,
                "{} | {:<4} | {:<6} x {:<5} @ {:>10.2} | Cash: {:.2}",
                format_local(transaction.time, &util::DATE_TIME_FORMAT),
                transaction.side,
                transaction.symbol,
                transaction.shares,
                transaction.price,
                transaction.cash_after,
            )?;
        }

        log_buffer("Recent Transactions", buf);
        Ok(())
    }

    fn log_performance(&self, count: usize) -> io::Result<()> {
        let baseline = match self.account.performance_baseline() {
            Some(baseline) => baseline,
            None => {
                info!("No performance points recorded yet");
                return Ok(());
            }
        };

        let mut buf = Cursor::new(Vec::<u8>::with_capacity(256));
        let mut first = true;

        for point in self.account.recent_performance(count) {
            if !first {
                writeln!(buf)?;
            }
            first = false;

            let change = (point.total_value - baseline) / baseline * Decimal::ONE_HUNDRED;
            write!(
                buf,
                "{} | {:>12.2} | {:>+8.2}%",
                format_local(point.time, &util::TIME_FORMAT),
                point.total_value,
                change,
            )?;
        }

        log_buffer("Performance (change vs. first recorded point)", buf);
        Ok(())
    }

    fn log_status(&self) -> io::Result<()> {
        let mut buf = Cursor::new(Vec::<u8>::with_capacity(256));

        writeln!(buf, "Cash: {:.2}", self.account.cash())?;
        match self.account.total_value(&self.market) {
            Ok(total) => {
                writeln!(buf, "Total Value: {total:.2}")?;
                if let Some(baseline) = self.account.performance_baseline() {
                    let change = (total - baseline) / baseline * Decimal::ONE_HUNDRED;
                    writeln!(buf, "Return Since Start: {change:+.2}%")?;
                }
            }
            Err(error) => error!("{error}"),
        }

        let open_positions = self
            .account
            .holdings()
            .filter(|holding| holding.shares > 0)
            .count();
        writeln!(buf, "Open Positions: {open_positions}")?;
        writeln!(
            buf,
            "Transactions: {}",
            self.account.transactions().len()
        )?;
        write!(
            buf,
            "Performance Points: {}",
            self.account.performance().len()
        )?;

        log_buffer("Engine Status", buf);
        Ok(())
    }
}

fn save_path(file: Option<&str>) -> PathBuf {
    PathBuf::from(file.unwrap_or(&Config::get().trading.save_file))
}

fn format_local(
    datetime: OffsetDateTime,
    format: &[time::format_description::FormatItem<'_>],
) -> String {
    match Config::localize(datetime).format(format) {
        Ok(formatted) => formatted,
        Err(_) => "??".to_owned(),
    }
}

fn log_buffer(title: &str, buf: Cursor<Vec<u8>>) {
    match String::from_utf8(buf.into_inner()) {
        Ok(message) => info!("{title}\n{message}"),
        Err(error) => error!("Invalid message encoding: {error:?}"),
    }
}

fn truncate(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((index, _)) => &s[..index],
        None => s,
    }
}
