//! Order domain: the order document the assignment pipeline mutates, the cart
//! it is built from, and the storage ports both live behind.

pub mod cart;
pub mod order;
pub mod store;

pub use cart::{Cart, CartItem};
pub use order::{
    AssignmentState, DealerMapping, DealerRef, MappingStatus, NewOrderLine, Order, OrderLine,
    OrderStatus, OrderTimestamps, PlaceOrder,
};
pub use store::{CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore, StoreError};
