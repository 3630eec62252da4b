//! HTTP surface
//!
//! JSON in, JSON out. Orchestrator errors become `{kind, message, retryable}`
//! bodies with a status derived from their kind.

use morph_core::error::{ErrorKind, OrchestratorError};
use morph_core::types::{PlanId, PlanSpec, TopologySnapshot};
use morph_engine::{ApiError, Orchestrator, Recommendation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// HTTP status for an error classification
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError | ErrorKind::ConfigError => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ConflictError | ErrorKind::IllegalTransition | ErrorKind::VersionConflict => {
            StatusCode::CONFLICT
        }
        ErrorKind::ExecutionError
        | ErrorKind::HealthCheckFailure
        | ErrorKind::RollbackFailure
        | ErrorKind::Cancelled
        | ErrorKind::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json<T: Serialize>(body: &T, status: StatusCode) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn error_reply(e: &OrchestratorError) -> WithStatus<Json> {
    let status = status_for(e.kind());
    if status.is_server_error() {
        error!(kind = %e.kind(), error = %e, "request failed");
    } else {
        debug!(kind = %e.kind(), error = %e, "request rejected");
    }
    json(&ApiError::from(e), status)
}

fn respond<T: Serialize>(result: Result<T, OrchestratorError>, ok: StatusCode) -> WithStatus<Json> {
    match result {
        Ok(body) => json(&body, ok),
        Err(e) => error_reply(&e),
    }
}

/// Parse the `{id}` path segment before calling `f`
fn with_plan_id(raw: &str, f: impl FnOnce(PlanId) -> WithStatus<Json>) -> WithStatus<Json> {
    match raw.parse::<PlanId>() {
        Ok(id) => f(id),
        Err(e) => json(
            &ApiError {
                kind: ErrorKind::ValidationError,
                message: format!("invalid plan id {raw}: {e}"),
                retryable: false,
            },
            StatusCode::BAD_REQUEST,
        ),
    }
}

/// Every route, without rejection recovery
pub fn routes(
    orchestrator: Arc<Orchestrator>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let state = warp::any().map(move || Arc::clone(&orchestrator));

    let create_plan = warp::path!("plans")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .map(|spec: PlanSpec, o: Arc<Orchestrator>| {
            respond(o.create_plan(spec), StatusCode::CREATED)
        });

    let list_plans = warp::path!("plans")
        .and(warp::get())
        .and(state.clone())
        .map(|o: Arc<Orchestrator>| json(&o.list_plans(), StatusCode::OK));

    let get_plan = warp::path!("plans" / String)
        .and(warp::get())
        .and(state.clone())
        .map(|raw: String, o: Arc<Orchestrator>| {
            with_plan_id(&raw, |id| respond(o.get_plan(id), StatusCode::OK))
        });

    let execute_plan = warp::path!("plans" / String / "execute")
        .and(warp::post())
        .and(state.clone())
        .map(|raw: String, o: Arc<Orchestrator>| {
            with_plan_id(&raw, |id| respond(o.execute_plan(id), StatusCode::ACCEPTED))
        });

    let abort_plan = warp::path!("plans" / String / "abort")
        .and(warp::post())
        .and(state.clone())
        .map(|raw: String, o: Arc<Orchestrator>| {
            with_plan_id(&raw, |id| respond(o.abort_plan(id), StatusCode::OK))
        });

    let recommend = warp::path!("recommendations")
        .and(warp::post())
        .and(warp::body::json())
        .and(state.clone())
        .map(|recommendation: Recommendation, o: Arc<Orchestrator>| {
            respond(
                o.create_plan_from_recommendation(&recommendation),
                StatusCode::CREATED,
            )
        });

    let topology = warp::path!("topology")
        .and(warp::get())
        .and(state.clone())
        .map(|o: Arc<Orchestrator>| json(o.topology().as_ref(), StatusCode::OK));

    let history = warp::path!("topology" / "history")
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(state.clone())
        .map(|query: HistoryQuery, o: Arc<Orchestrator>| {
            let snapshots = o.topology_history(query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
            let body: Vec<&TopologySnapshot> = snapshots.iter().map(AsRef::as_ref).collect();
            json(&body, StatusCode::OK)
        });

    let status = warp::path!("status")
        .and(warp::get())
        .and(state)
        .map(|o: Arc<Orchestrator>| json(&o.status(), StatusCode::OK));

    create_plan
        .or(list_plans)
        .or(get_plan)
        .or(execute_plan)
        .or(abort_plan)
        .or(recommend)
        .or(topology)
        .or(history)
        .or(status)
}

/// Turn filter rejections into the same error body as orchestrator errors
///
/// # Errors
/// Never; the signature is what `recover` expects.
pub async fn handle_rejection(rejection: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let (status, kind, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, ErrorKind::NotFound, "no such route".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, ErrorKind::ValidationError, e.to_string())
    } else if let Some(e) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, ErrorKind::ValidationError, e.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::NotFound,
            "method not allowed".to_string(),
        )
    } else {
        error!(?rejection, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ExecutionError,
            format!("{rejection:?}"),
        )
    };
    Ok(json(
        &ApiError {
            kind,
            message,
            retryable: false,
        },
        status,
    ))
}

/// Serve the API on `addr` until `shutdown` resolves
///
/// # Errors
/// When the address cannot be bound.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let api = routes(orchestrator)
        .recover(handle_rejection)
        .with(warp::trace::request());
    let (bound, server) = warp::serve(api).try_bind_with_graceful_shutdown(addr, shutdown)?;
    info!(addr = %bound, "http api listening");
    server.await;
    info!("http api stopped");
    Ok(())
}
