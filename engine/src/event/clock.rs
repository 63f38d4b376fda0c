use super::{ClockEvent, EventEmitter};
use common::config::Config;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Advances the simulated market on a fixed cadence. The sandbox market has
/// no open/close calendar; it moves for as long as the process runs.
pub async fn run_task(emitter: EventEmitter<ClockEvent>) {
    let tick_duration = Duration::from_secs(Config::get().market.seconds_per_tick.max(1));

    let mut ticker = interval(tick_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick completes immediately; skip it so the market
    // does not move before the baseline performance point is visible.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        emitter.emit(ClockEvent::Tick).await;
    }
}
