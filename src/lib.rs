pub mod backoff;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod registry;
pub mod storage;
pub mod web;
pub mod worker;

pub use config::{DatabaseConfig, ServerConfig, WorkerConfig};
pub use error::{QueueError, Result};
