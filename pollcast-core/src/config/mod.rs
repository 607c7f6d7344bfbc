//! Configuration types for the poll engine.
//!
//! These types represent validated runtime configuration. Loading and
//! parsing from files is handled by the server crate.

mod config_store;
mod poll;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use poll::{
    BackoffPolicy, DEFAULT_BACKOFF, DEFAULT_INTERVAL, DEFAULT_WINDOW_CAPACITY, DedupStrategy,
    PollConfig,
};
