// tablecast-broker library entry point.

pub mod broadcast;
pub mod config;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod store;
pub mod watcher;
