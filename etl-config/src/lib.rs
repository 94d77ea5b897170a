//! Configuration types shared by the ETL runtime.
//!
//! The [`shared`] module holds the serde-backed settings consumed by the schedulers, the retry
//! machinery and the batch write pipeline. [`load_config`] assembles any [`Config`] type from the
//! `configuration/` directory and `APP_`-prefixed environment variables.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
