//! fxn Connector - REST front end for a head node and its local workers
//!
//! The binary runs one head and a configurable number of workers on an
//! in-process [`fxn_network::MemoryHub`]. Workers run functions as child
//! processes and keep installed functions in a directory per worker.

pub mod api;
pub mod config;
pub mod fstore;
pub mod process_executor;
pub mod swarm;

pub use api::{ApiError, ApiState};
pub use config::ConnectorConfig;
pub use fstore::DirFunctionStore;
pub use process_executor::ProcessExecutor;
pub use swarm::LocalSwarm;
