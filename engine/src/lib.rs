pub mod anomaly;
pub mod calibration;
pub mod config;
pub mod db;
pub mod errors;
pub mod firmware;
pub mod health;
pub mod locks;
pub mod memory_store;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod rest;
pub mod service;
pub mod store;
pub mod validate;
pub mod worker;

pub use errors::{Error, Result};
pub use memory_store::MemoryStore;
pub use service::IotService;
pub use store::Store;
