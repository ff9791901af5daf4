pub mod comms;
pub mod config;
pub mod error;
pub mod operations;
pub mod security;
pub mod simulator;
pub mod transport;
pub mod utils;

pub use config::Settings;
pub use error::{BrokerError, Result};
pub use transport::ApiClient;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
