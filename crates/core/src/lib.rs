//! Domain layer for the order-to-invoice pipeline.
//!
//! [`types`] holds the canonical [`types::Invoice`] record every other crate
//! consumes; [`normalizer`] maps raw webhook payloads onto it.

pub mod normalizer;
pub mod types;
