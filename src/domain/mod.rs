//! Core domain types and port interfaces. Nothing in this module depends on `tokio` I/O,
//! `sqlx`, or `reqwest` directly: those live in `infrastructure` behind the traits in `ports`.

pub mod candle;
pub mod errors;
pub mod indicator;
pub mod job;
pub mod ledger;
pub mod ports;
pub mod strategy;
