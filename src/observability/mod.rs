//! Observability: structured logging and in-process metrics

pub mod logging;
pub mod metrics;

pub use logging::{parse_level, LogFormat, LogSettings};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{config_span, stage_span, task_span};
