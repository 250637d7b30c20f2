pub mod adapter;
pub mod config;
pub mod connection;
pub mod errors;
pub mod logger;
pub mod memory;
pub mod populate;
pub mod query;
pub mod store;
pub mod telemetry;
pub mod types;

pub use adapter::Adapter;
pub use config::AdapterConfig;
pub use connection::ConnectionState;
pub use errors::AdapterError;
pub use memory::{MemoryDriver, MemoryStore};
pub use query::{QueryEnvelope, Reply, ReplyData, Verb, parse_envelope_json};
pub use store::{Connection, StorageDriver};

/// Initializes logging from `log4rs.yaml` in the working directory.
///
/// # Errors
/// Returns an error if the file is missing or invalid, or a logger is already installed.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    logger::init()
}
