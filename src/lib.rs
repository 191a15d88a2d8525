//! Library surface exposing the broker's internals for integration testing
//! and for embedding by an external HTTP server (the upgrade hook in
//! `service::service::Service::upgrade`). `main.rs` only wires the CLI.

pub mod cli;
pub mod client;
pub mod helpers;
pub mod hub;
pub mod indexer;
pub mod instrumentation;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod tail_service;
pub mod tailer;
