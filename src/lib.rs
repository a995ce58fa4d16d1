//! JiranLink core: nearest-district detection and neighbourhood listing search.

pub mod catalog;
pub mod config;
pub mod location;
pub mod server;
