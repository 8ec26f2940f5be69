pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod fetch_cache;
pub mod http_client;
pub mod logging;
pub mod model;
pub mod orientation;
pub mod remote;
pub mod runner;
pub mod store;
