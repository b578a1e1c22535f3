//! # Request Handlers
//!
//! Handlers for the queues this process serves itself.

pub mod health;

pub use health::*;
