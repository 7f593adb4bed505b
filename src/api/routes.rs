//! Route table

use crate::api::handlers;
use crate::api::AppState;
use crate::agents::AgentType;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

/// Largest accepted JSON body
const MAX_BODY_BYTES: u64 = 256 * 1024;

/// Query string of `GET /configs`
#[derive(Debug, Deserialize)]
pub struct ListConfigsQuery {
    pub workspace_id: String,
    pub agent_type: Option<AgentType>,
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T: DeserializeOwned + Send>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// All API routes with JSON error replies for rejections
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    config_routes(state.clone())
        .or(generation_routes(state.clone()))
        .or(operational_routes(state))
        .recover(handlers::handle_rejection)
        .with(warp::trace::request())
}

fn config_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let create = warp::path!("configs")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::create_config);

    let list = warp::path!("configs")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and(warp::query::<ListConfigsQuery>())
        .and_then(handlers::list_configs);

    let get = warp::path!("configs" / Uuid)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::get_config);

    let update = warp::path!("configs" / Uuid)
        .and(warp::put())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::update_config);

    let delete = warp::path!("configs" / Uuid)
        .and(warp::delete())
        .and(with_state(state))
        .and_then(handlers::delete_config);

    create.or(list).or(get).or(update).or(delete)
}

fn generation_routes(
    state: AppState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let submit = warp::path!("generations")
        .and(warp::post())
        .and(with_state(state.clone()))
        .and(json_body())
        .and_then(handlers::submit_generation);

    let status = warp::path!("generations" / Uuid)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handlers::generation_status);

    let cancel = warp::path!("generations" / Uuid / "cancel")
        .and(warp::post())
        .and(with_state(state))
        .and_then(handlers::cancel_generation);

    submit.or(status).or(cancel)
}

fn operational_routes(
    state: AppState,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handlers::health);

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and_then(handlers::metrics_snapshot);

    health.or(metrics)
}
