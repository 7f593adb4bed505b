//! HTTP/JSON surface of the pipeline
//!
//! Config management, generation submission, status polling and operational
//! endpoints, served with warp.

pub mod handlers;
pub mod routes;

use crate::agents::ConfigResolver;
use crate::llm::provider::LlmProvider;
use crate::pipeline::{PipelineOrchestrator, StatusPoller};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub use handlers::{error_reply, handle_rejection};
pub use routes::routes;

/// Shared handles injected into every route
#[derive(Clone)]
pub struct AppState {
    pub service_id: String,
    pub llm: Arc<dyn LlmProvider>,
    pub resolver: Arc<ConfigResolver>,
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub poller: StatusPoller,
}

impl AppState {
    pub fn new(
        service_id: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        orchestrator: Arc<PipelineOrchestrator>,
    ) -> Self {
        let resolver = orchestrator.resolver().clone();
        let poller = StatusPoller::new(orchestrator.tasks().clone());
        Self {
            service_id: service_id.into(),
            llm,
            resolver,
            orchestrator,
            poller,
        }
    }
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> SocketAddr
where
    F: Future<Output = ()> + Send + 'static,
{
    let (bound, server) = warp::serve(routes(state)).bind_with_graceful_shutdown(addr, shutdown);
    info!(addr = %bound, "HTTP API listening");
    server.await;
    info!("HTTP API stopped");
    bound
}
