// storefront/src/lib.rs

//! KatmanduShop order service: checkout against Khalti and reconciliation of
//! the returned payment with orders, stock and carts.

pub mod config;
pub mod errors;
pub mod models;
pub mod pipelines;
pub mod services;
pub mod state;
pub mod store;
pub mod web;
