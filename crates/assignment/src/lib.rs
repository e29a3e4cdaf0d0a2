//! Dealer assignment: pick a fulfilling dealer for every line of a paid order,
//! take the stock, and move the order to `Assigned`.
//!
//! The engine talks to the outside world only through ports:
//! - `OrderStore` (from `dealerflow-orders`)
//! - `InventoryService`: dealer availability + atomic decrement
//! - `Notifier`: best-effort side channel

pub mod engine;
pub mod error;
pub mod inventory;
pub mod notify;
pub mod selection;

pub use engine::{AssignmentEngine, AssignmentReport};
pub use error::AssignmentError;
pub use inventory::{
    DealerAvailability, DecrementCall, DecrementOutcome, DecrementRequest, InMemoryInventory,
    InventoryError, InventoryService,
};
pub use notify::{
    notify_best_effort, Audience, NoopNotifier, Notification, Notifier, NotifyError,
    RecordingNotifier,
};
pub use selection::rank_candidates;
