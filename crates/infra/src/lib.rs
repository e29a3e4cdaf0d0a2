//! Infrastructure layer: job queue, Postgres and Redis adapters, HTTP clients,
//! configuration and worker wiring.

pub mod config;
pub mod db;
pub mod http;
pub mod jobs;
pub mod runtime;
pub mod workers;
