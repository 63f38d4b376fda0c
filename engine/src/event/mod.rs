pub mod clock;
pub mod command;

use std::{fmt::Debug, marker::PhantomData};

use log::warn;
use stock_symbol::Symbol;
use tokio::sync::mpsc::{channel, Receiver, Sender};

pub struct EventReceiver {
    rx: Receiver<EngineEvent>,
    tx: Sender<EngineEvent>,
}

impl EventReceiver {
    pub fn new() -> Self {
        let (tx, rx) = channel(16);

        Self { rx, tx }
    }

    pub fn new_emitter<T: Into<EngineEvent> + Debug>(&self) -> EventEmitter<T> {
        EventEmitter {
            tx: self.tx.clone(),
            _marker: PhantomData,
        }
    }

    pub async fn next(&mut self) -> EngineEvent {
        self.rx
            .recv()
            .await
            .expect("EventReceiver should contain a sender holding the channel open")
    }
}

pub struct EventEmitter<T> {
    tx: Sender<EngineEvent>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Into<EngineEvent> + Debug> EventEmitter<T> {
    pub async fn emit(&self, event: T) {
        if let Err(error) = self.tx.send(event.into()).await {
            warn!("Failed to emit event: {:?}", error.0);
        }
    }
}

impl<T> Clone for EventEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            _marker: PhantomData,
        }
    }
}

#[derive(Debug)]
pub enum EngineEvent {
    Command(Command),
    Clock(ClockEvent),
}

impl From<Command> for EngineEvent {
    fn from(event: Command) -> Self {
        Self::Command(event)
    }
}

impl From<ClockEvent> for EngineEvent {
    fn from(event: ClockEvent) -> Self {
        Self::Clock(event)
    }
}

#[derive(Debug)]
pub enum Command {
    Market,
    Buy { symbol: Symbol, shares: u32 },
    Sell { symbol: Symbol, shares: u32 },
    Portfolio,
    Transactions { count: Option<usize> },
    Performance { count: Option<usize> },
    Tick { count: u32 },
    NewSession,
    EngineDump,
    Save { file: Option<String> },
    Load { file: Option<String> },
    Status,
    Stop,
}

#[derive(Debug)]
pub enum ClockEvent {
    Tick,
}
