// Library root: the binary in `src/main.rs` and the integration tests in
// `tests/` both build on these modules.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod services;
pub mod store;
