pub mod clock;
pub mod config;
pub mod connection_manager;
pub mod database;
pub mod database_manager;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod registry;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use ledger::BetLedger;
pub use registry::PoolRegistry;
