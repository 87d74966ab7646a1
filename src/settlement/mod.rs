pub mod batcher;
pub mod scanner;

pub use batcher::{SettlementBatcher, SettlementMode, SettlementOutcome};
pub use scanner::ExpiryScanner;
