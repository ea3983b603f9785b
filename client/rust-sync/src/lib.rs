#![allow(dead_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

pub use config::Config;
pub use error::{StoreError, SyncError};
pub use services::coordinator::{HydrationCoordinator, LogNotifier, NotificationSink};
pub use services::fetcher::FetchOutcome;
