//! REST API module for probes and scraping
//!
//! Serves `/health` for liveness checks and `/metrics` in the Prometheus text
//! format.

mod dto;
mod handlers;
mod server;

pub use server::{run_server, ApiState};
