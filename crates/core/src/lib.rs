//! Shared domain primitives for dealerflow.
//!
//! Identifiers, the canonical SKU value object and the domain error model.
//! No IO lives here.

pub mod error;
pub mod id;
pub mod sku;

pub use error::{DomainError, DomainResult};
pub use id::{DealerId, OrderId, PaymentId, ProductId, UserId};
pub use sku::Sku;
