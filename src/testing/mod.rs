//! Testing utilities and mock implementations
//!
//! Lets the pipeline, resolver and HTTP surface be tested without a model
//! backend or a real database.

pub mod mocks;

pub use mocks::*;
