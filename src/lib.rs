//! Content Pipeline
//!
//! A four-stage content generation service. Every request flows through
//! ideation, research, content and editor stages in order; each stage runs
//! with an agent configuration resolved per workspace, and each stage's
//! output becomes the next stage's input.
//!
//! # Overview
//!
//! - [`agents`]: agent configuration records and the resolver that keeps at
//!   most one default per workspace and stage
//! - [`pipeline`]: generation tasks, their state machine, the orchestrator
//!   that runs them in the background and the status poller
//! - [`stages`]: the executor seam and the LLM-backed executor
//! - [`llm`]: provider abstraction with an OpenAI implementation
//! - [`api`]: HTTP/JSON surface served with warp
//!
//! # Quick Start
//!
//! ```rust
//! use content_pipeline::agents::{AgentType, ConfigResolver, InMemoryConfigStore, NewAgentConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let resolver = ConfigResolver::new(Arc::new(InMemoryConfigStore::new()));
//! let created = resolver
//!     .create(NewAgentConfig::new("acme", AgentType::Editor, "House style").with_default(true))
//!     .await
//!     .unwrap();
//!
//! let resolved = resolver.resolve("acme", AgentType::Editor, None).await.unwrap();
//! assert_eq!(resolved.id, created.id);
//! # });
//! ```

pub mod agents;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod llm;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

pub use agents::{AgentConfig, AgentType, ConfigResolver, NewAgentConfig};
pub use config::{ConfigError, ServiceConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{GenerationRequest, PipelineOrchestrator, StatusPoller, TaskStatus};
