pub mod candle_store;
pub mod database;
pub mod indicator_store;
pub mod job_store;
pub mod ledger_store;
pub mod strategy_store;

pub use candle_store::SqliteCandleStore;
pub use database::Database;
pub use indicator_store::SqliteIndicatorStore;
pub use job_store::SqliteJobStore;
pub use ledger_store::SqliteLedgerStore;
pub use strategy_store::SqliteStrategyStore;
