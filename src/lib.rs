pub mod app;
pub mod config;
pub mod datastore;
pub mod domain;
pub mod error;
pub mod filter;
pub mod layout;
pub mod metadata;
pub mod output;
pub mod progress;
pub mod resolver;
pub mod rpc;
pub mod session;
pub mod sort;
pub mod transfer;
pub mod walker;
