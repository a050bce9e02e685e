// storefront/src/models/mod.rs

//! Data structures for persisted entities and checkout payloads.

pub mod cart;
pub mod checkout;
pub mod customer;
pub mod order;
pub mod product;

pub use cart::{Cart, CartItem, DEFAULT_VARIANT};
pub use checkout::{CaptureOutcome, CaptureRequest, CheckoutLineItem, CheckoutRequest, CheckoutSession};
pub use customer::Customer;
pub use order::{AddressInfo, CaptureFailure, Order, OrderLineItem, OrderState, OrderStatus, PaymentStatus};
pub use product::Product;
