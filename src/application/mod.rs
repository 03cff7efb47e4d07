// Application layer: the ledger's use cases, independent of storage and front end.

pub mod config;
pub mod error;
pub mod service;

pub use config::*;
pub use error::*;
pub use service::*;
