mod account;
mod engine_impl;
mod error;
mod market;

pub use engine_impl::run;
pub use error::EngineError;
