pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod image;
pub mod offchain;
pub mod onchain;
pub mod output;
pub mod queue;
pub mod store;
