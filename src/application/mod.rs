//! Application layer: orchestration logic over the domain ports, with no direct dependency on
//! any concrete adapter (sqlx, reqwest, prometheus) beyond the trait objects infrastructure
//! supplies.

pub mod coordinator;
pub mod indicators;
pub mod ingestion;
pub mod ledger;
pub mod normalizer;
pub mod rate_limiter;
pub mod session_filter;
pub mod strategy;
