pub mod config;
pub mod error;

pub use config::{BridgeConfig, Config, HostConfig, WatchdogConfig};
pub use error::*;
