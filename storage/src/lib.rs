//! Durable storage for the simulation state. A [`SaveData`] bundle captures
//! everything observable about a (market, account) pair; the price RNG is
//! deliberately excluded and gets re-seeded on restore.

use std::path::Path;

use entity::trading::{Holding, Instrument, PerformancePoint, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// The complete persisted form of one sandbox session. Saving and loading
/// operate on whole bundles; a load replaces all in-memory state, never
/// merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    pub instruments: Vec<Instrument>,
    pub cash: Decimal,
    pub holdings: Vec<Holding>,
    pub transactions: Vec<Transaction>,
    pub performance: Vec<PerformancePoint>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("save file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("save file is unreadable or corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

pub async fn save(path: &Path, data: &SaveData) -> Result<(), StorageError> {
    let mut save_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await?;

    let buf = serde_json::to_string(data)?;
    save_file.write_all(buf.as_bytes()).await?;

    Ok(())
}

pub async fn load(path: &Path) -> Result<SaveData, StorageError> {
    let mut save_file = OpenOptions::new()
        .read(true)
        .write(false)
        .open(path)
        .await?;

    let mut buf = String::with_capacity(usize::try_from(save_file.metadata().await?.len()).unwrap_or(0));
    save_file.read_to_string(&mut buf).await?;

    Ok(serde_json::from_str(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity::trading::OrderSide;
    use std::env;
    use std::path::PathBuf;
    use stock_symbol::Symbol;
    use time::OffsetDateTime;

    fn temp_save_path(name: &str) -> PathBuf {
        env::temp_dir().join(format!("sandbox-{name}-{}.json", std::process::id()))
    }

    fn sample_bundle() -> SaveData {
        let aapl = Symbol::from_str("AAPL").unwrap();
        let now = OffsetDateTime::now_utc();

        SaveData {
            instruments: vec![Instrument {
                symbol: aapl,
                name: "Apple Inc.".to_owned(),
                price: Decimal::new(20512, 2),
                day_open: Decimal::new(20000, 2),
            }],
            cash: Decimal::new(794880, 2),
            holdings: vec![Holding {
                symbol: aapl,
                shares: 10,
                avg_cost: Decimal::new(20512, 2),
            }],
            transactions: vec![Transaction {
                time: now,
                side: OrderSide::Buy,
                symbol: aapl,
                shares: 10,
                price: Decimal::new(20512, 2),
                cash_after: Decimal::new(794880, 2),
            }],
            performance: vec![PerformancePoint {
                time: now,
                total_value: Decimal::new(1_000_000, 2),
            }],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_all_observable_state() {
        let path = temp_save_path("round-trip");
        let bundle = sample_bundle();

        save(&path, &bundle).await.unwrap();
        let restored = load(&path).await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(restored, bundle);
    }

    #[tokio::test]
    async fn corrupt_save_file_is_a_format_error() {
        let path = temp_save_path("corrupt");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let result = load(&path).await;
        let _ = tokio::fs::remove_file(&path).await;

        assert!(matches!(result, Err(StorageError::Format(_))));
    }

    #[tokio::test]
    async fn missing_save_file_is_an_io_error() {
        let path = temp_save_path("missing");
        assert!(matches!(load(&path).await, Err(StorageError::Io(_))));
    }
}
