//! Clients for the HTTP services the pipeline depends on.

pub mod inventory;
pub mod notify;

pub use inventory::HttpInventoryClient;
pub use notify::HttpNotifier;

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("failed to build http client: {0}")]
    Build(String),
}
