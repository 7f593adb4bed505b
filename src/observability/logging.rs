//! Tracing setup for the pipeline service
//!
//! Settings come from `LOG_LEVEL`, `LOG_FORMAT` (`json`, `pretty` or
//! `compact`) and `LOG_SPANS`. A non-empty `RUST_LOG` replaces the
//! level and the dependency quieting entirely.
//!
//! The span macros at the bottom name the three units of work the service
//! logs under: a generation task, one stage of it, and a config write.

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

/// Crates whose info output drowns out task progress
const NOISY_TARGETS: [&str; 4] = ["hyper", "warp", "reqwest", "tokio"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    Pretty,
    /// Single-line colored output without targets
    Compact,
}

impl LogFormat {
    /// Unknown names fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a level name; unknown names fall back to INFO
pub fn parse_level(s: &str) -> Level {
    s.trim().parse().unwrap_or(Level::INFO)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Level,
    pub format: LogFormat,
    /// Emit an event when task and stage spans open and close
    pub include_spans: bool,
    pub filter_override: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            include_spans: false,
            filter_override: None,
        }
    }
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read settings through `lookup`, so callers other than the process
    /// environment can supply the variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(level) = lookup("LOG_LEVEL") {
            settings.level = parse_level(&level);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            settings.format = LogFormat::parse(&format);
        }
        settings.include_spans = lookup("LOG_SPANS")
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        settings.filter_override = lookup("RUST_LOG").filter(|value| !value.trim().is_empty());
        settings
    }

    pub fn filter(&self) -> EnvFilter {
        if let Some(directives) = &self.filter_override {
            return EnvFilter::new(directives);
        }
        let directives = std::iter::once(self.level.to_string().to_lowercase())
            .chain(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")))
            .collect::<Vec<_>>()
            .join(",");
        EnvFilter::new(directives)
    }

    fn span_events(&self) -> FmtSpan {
        if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    /// Install the global subscriber. A second call is a no-op.
    pub fn init(&self) {
        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_span_events(self.span_events())
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(self.span_events())
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(self.span_events())
                .boxed(),
        };

        let _ = tracing_subscriber::registry()
            .with(layer)
            .with(self.filter())
            .try_init();
    }
}

/// Span covering one generation task's run loop
#[macro_export]
macro_rules! task_span {
    ($($field:tt)*) => {
        tracing::info_span!("generation_task", $($field)*)
    };
}

/// Span covering one stage execution inside a task
#[macro_export]
macro_rules! stage_span {
    ($($field:tt)*) => {
        tracing::info_span!("pipeline_stage", $($field)*)
    };
}

/// Span covering a config write under the default-key lock
#[macro_export]
macro_rules! config_span {
    ($($field:tt)*) => {
        tracing::info_span!("config_write", $($field)*)
    };
}

pub use {config_span, stage_span, task_span};
