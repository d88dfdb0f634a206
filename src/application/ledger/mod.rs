pub mod lifecycle;

pub use lifecycle::LedgerLifecycle;
