//! HTTP API: payment webhook trigger, health, order status and admin triage.

pub mod app;
pub mod middleware;
pub mod signature;
