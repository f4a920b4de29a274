//! HTTP surface of the operator
//!
//! Liveness/readiness probes and the Prometheus scrape endpoint.

mod dto;
mod handlers;
mod server;

pub use server::{run_metrics_server, run_probe_server};
