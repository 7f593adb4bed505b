//! LLM provider abstraction layer
//!
//! Stage executors depend on the [`LlmProvider`] trait; concrete backends
//! live under [`providers`].

pub mod provider;
pub mod providers;

pub use provider::*;
pub use providers::*;
