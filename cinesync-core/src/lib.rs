pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod models;
pub mod op;
pub mod provider;
pub mod repository;
pub mod service;
pub mod shutdown;

pub use config::Config;
pub use error::{Error, Result};

// Global server start time for uptime reporting
use once_cell::sync::Lazy;
use std::time::Instant;

pub static SERVER_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);
