//! Tailnet machine discovery and TCP service reachability scanning.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod exec;
pub mod orchestrator;
pub mod scanner;
pub mod scheduler;
pub mod status;
pub mod table;

pub use error::{Error, Result};
pub use orchestrator::{MachineRefresh, Orchestrator, ScanReport};
