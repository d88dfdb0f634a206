pub mod mock;
pub mod oanda;
pub mod secondary;

pub use mock::MockBroker;
pub use oanda::OandaBroker;
pub use secondary::SecondaryBroker;
