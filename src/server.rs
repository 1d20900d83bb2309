//! HTTP health surface

use crate::config::ServerConfig;
use crate::driver::Driver;
use crate::health::ConnectionStatus;
use crate::manager::ConnectionManager;
use crate::{Result, ServerError};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// `GET /api/health`
///
/// 200 when connected, 503 otherwise. In production the route answers 404
/// unless `enable_health_endpoint_in_production` is set.
pub fn health_routes<D: Driver>(
    manager: ConnectionManager<D>,
    config: &ServerConfig,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let exposed =
        !config.environment.is_production() || config.enable_health_endpoint_in_production;

    warp::path!("api" / "health")
        .and(warp::get())
        .and_then(move || {
            let manager = manager.clone();
            async move { handle_health(manager, exposed).await }
        })
}

async fn handle_health<D: Driver>(
    manager: ConnectionManager<D>,
    exposed: bool,
) -> std::result::Result<Response, Infallible> {
    if !exposed {
        debug!("Health endpoint disabled in production");
        let reply = warp::reply::with_status(
            warp::reply::json(&json!({ "error": "Not found" })),
            StatusCode::NOT_FOUND,
        );
        return Ok(reply.into_response());
    }

    let health = manager.check_health().await;
    let code = match health.status {
        ConnectionStatus::Connected => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    let reply = warp::reply::with_header(
        warp::reply::with_status(warp::reply::json(&health), code),
        "cache-control",
        "no-store",
    );
    Ok(reply.into_response())
}

/// Serve the health routes until `shutdown` resolves
pub async fn serve<D, S>(manager: ConnectionManager<D>, config: &ServerConfig, shutdown: S) -> Result<()>
where
    D: Driver,
    S: Future<Output = ()> + Send + 'static,
{
    let routes = health_routes(manager, config);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.port), shutdown)
        .map_err(|e| {
            ServerError::internal_error(
                format!("Failed to bind port {}", config.port),
                Some(e.to_string()),
            )
        })?;

    info!("Health endpoint available at http://{}/api/health", addr);
    server.await;

    info!("Server stopped");
    Ok(())
}
