//! Network-accessible named-mutex coordination service.

pub mod config;
pub mod error;
pub mod lock_entry;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod waiter;

pub use config::{ConfigFile, LockConfig};
pub use registry::LockRegistry;
pub use server::LockServer;
