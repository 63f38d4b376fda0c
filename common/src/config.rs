use crate::util::SerdeLevelFilter;
use anyhow::{anyhow, Context};
use log::LevelFilter;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::sync::OnceLock;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
    sync::atomic::{AtomicU32, Ordering},
};
use stock_symbol::Symbol;
use time::{OffsetDateTime, UtcOffset};

static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

const CONFIG_PATH: &str = "./config.json";

pub struct Config {
    pub market: MarketConfig,
    pub trading: TradingConfig,
    pub utc_offset: LocalOffset,
    pub log_level_filter: LevelFilter,
}

impl Config {
    pub fn get() -> &'static Self {
        GLOBAL_CONFIG.get().expect("Config not set")
    }

    pub fn init() -> anyhow::Result<()> {
        let config_path = Path::new(CONFIG_PATH);

        let on_disk_config = if config_path.exists() {
            let mut config_file = OpenOptions::new()
                .read(true)
                .write(false)
                .open(config_path)
                .context("Failed to open config file")?;

            let mut buf = String::with_capacity(usize::try_from(config_file.metadata()?.len())?);
            config_file
                .read_to_string(&mut buf)
                .context("Failed to read config file")?;

            match serde_json::from_str::<OnDiskConfig>(&buf) {
                Ok(config) => config,
                Err(error) => {
                    println!("Failed to read on-disk config ({error}), writing default config.");
                    let (default, buf) = OnDiskConfig::default_serialized();
                    drop(config_file);
                    fs::write(config_path, buf.as_bytes())
                        .context("Failed to write default config")?;
                    default
                }
            }
        } else {
            let mut config_file =
                File::create(config_path).context("Failed to create config file")?;
            let (default, buf) = OnDiskConfig::default_serialized();
            config_file
                .write_all(buf.as_bytes())
                .context("Failed to write default config")?;
            default
        };

        let utc_offset = match UtcOffset::current_local_offset() {
            Ok(offset) => LocalOffset::new(offset),
            Err(_) => on_disk_config
                .utc_offset
                .unwrap_or_else(|| LocalOffset::new(UtcOffset::UTC)),
        };

        let me = Self {
            market: on_disk_config.market,
            trading: on_disk_config.trading,
            utc_offset,
            log_level_filter: on_disk_config.log_level_filter,
        };

        GLOBAL_CONFIG
            .set(me)
            .map_err(|_| anyhow!("Config already initialized"))
    }

    pub fn localize(datetime: OffsetDateTime) -> OffsetDateTime {
        datetime.to_offset(Self::get().utc_offset.get())
    }
}

#[derive(Serialize, Deserialize)]
pub struct MarketConfig {
    pub instruments: Vec<InstrumentSeed>,
    pub seconds_per_tick: u64,
    pub tick_volatility: f64,
    pub price_floor: Decimal,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            instruments: vec![
                InstrumentSeed::new("AAPL", "Apple Inc.", Decimal::new(20000, 2)),
                InstrumentSeed::new("GOOG", "Alphabet Inc.", Decimal::new(280000, 2)),
                InstrumentSeed::new("MSFT", "Microsoft Corp.", Decimal::new(42000, 2)),
                InstrumentSeed::new("AMZN", "Amazon.com Inc.", Decimal::new(16000, 2)),
                InstrumentSeed::new("TSLA", "Tesla Inc.", Decimal::new(23000, 2)),
            ],
            seconds_per_tick: 10,
            tick_volatility: 0.005,
            price_floor: Decimal::new(1, 2),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct InstrumentSeed {
    pub symbol: Symbol,
    pub name: String,
    pub price: Decimal,
}

impl InstrumentSeed {
    fn new(symbol: &str, name: &str, price: Decimal) -> Self {
        Self {
            symbol: Symbol::from_str(symbol).expect("Invalid default instrument symbol"),
            name: name.to_owned(),
            price,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct TradingConfig {
    pub starting_cash: Decimal,
    pub save_file: String,
    pub recent_transactions: usize,
    pub recent_performance: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            starting_cash: Decimal::new(1_000_000, 2),
            save_file: "portfolio.json".to_owned(),
            recent_transactions: 8,
            recent_performance: 10,
        }
    }
}

pub struct LocalOffset {
    atomic_offset: AtomicU32,
}

impl LocalOffset {
    fn offset_to_u32(offset: UtcOffset) -> u32 {
        let (h, m, s) = offset.as_hms();
        let bytes = [h as u8, m as u8, s as u8, 0];
        u32::from_ne_bytes(bytes)
    }

    fn new(offset: UtcOffset) -> Self {
        Self {
            atomic_offset: AtomicU32::new(Self::offset_to_u32(offset)),
        }
    }

    pub fn get(&self) -> UtcOffset {
        let [h, m, s, _] = self.atomic_offset.load(Ordering::Relaxed).to_ne_bytes();
        UtcOffset::from_hms(h as i8, m as i8, s as i8)
            .expect("LocalOffset internal invariant violated")
    }

    pub fn set(&self, offset: UtcOffset) {
        self.atomic_offset
            .store(Self::offset_to_u32(offset), Ordering::Relaxed);
    }
}

impl Serialize for LocalOffset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.get().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LocalOffset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        UtcOffset::deserialize(deserializer).map(Self::new)
    }
}

#[derive(Serialize, Deserialize)]
struct OnDiskConfig {
    market: MarketConfig,
    trading: TradingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    utc_offset: Option<LocalOffset>,
    #[serde(with = "SerdeLevelFilter")]
    log_level_filter: LevelFilter,
}

impl OnDiskConfig {
    fn default_serialized() -> (Self, String) {
        let default = Self::default();
        let serialized =
            serde_json::to_string_pretty(&default).expect("Failed to serialize on-disk config");

        (default, serialized)
    }
}

impl Default for OnDiskConfig {
    fn default() -> Self {
        Self {
            market: MarketConfig::default(),
            trading: TradingConfig::default(),
            utc_offset: None,
            log_level_filter: LevelFilter::Info,
        }
    }
}
