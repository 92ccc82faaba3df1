//! Near-real-time position mirroring between two trading accounts.
//!
//! A watcher polls the master account through a terminal bridge, diffs
//! consecutive snapshots into discrete events, and hands them over an
//! in-process channel to an executor that replays them on the slave account,
//! tracking master→slave ticket mappings in a crash-recoverable store.

pub mod client;
pub mod config;
pub mod copier;
pub mod gateway;
pub mod models;
pub mod monitor;
pub mod runner;
pub mod tracker;
pub mod wire;
