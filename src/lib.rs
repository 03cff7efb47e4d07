pub mod application;
pub mod cli;
pub mod domain;
pub mod storage;

pub use application::{LedgerConfig, LedgerError, LedgerService};
pub use domain::*;
pub use storage::{LedgerStore, LedgerTx, MemoryStore, SqliteStore};
