//! Remote network-driver HTTP API
//!
//! The container engine posts JSON to `/Plugin.Activate` and
//! `/NetworkDriver.*`. Bodies are parsed by hand because the engine sends
//! `application/vnd.docker.plugins.v1+json`, which the `Json` extractor
//! rejects. Every failure answers HTTP 500 with `{"Err": "..."}`.

use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use ovn_driver::api::{
    ActivateResponse, AllocateNetworkRequest, AllocateNetworkResponse, CapabilitiesResponse,
    CreateEndpointRequest, CreateEndpointResponse, CreateNetworkRequest, DiscoveryNotification,
    EndpointInterface, EndpointRequest, ErrorResponse, InfoResponse, JoinRequest, JoinResponse,
    NetworkRequest, ProgramExternalConnectivityRequest,
};
use ovn_driver::{Driver, DriverError};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Content type of every response
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Error answered to the engine
#[derive(Debug)]
pub struct ApiError(String);

impl From<DriverError> for ApiError {
    fn from(err: DriverError) -> Self {
        ApiError(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Request failed: {}", self.0);
        plugin_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ErrorResponse { err: self.0 },
        )
    }
}

type ApiResult = Result<Response, ApiError>;

fn plugin_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(axum::http::header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn ok<T: serde::Serialize>(body: &T) -> ApiResult {
    Ok(plugin_response(StatusCode::OK, body))
}

fn empty() -> ApiResult {
    ok(&json!({}))
}

/// Decode a request body; an empty body decodes to the default value
fn parse<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError(format!("invalid request body: {}", e)))
}

/// Build the plugin router over a driver
pub fn create_router(driver: Arc<Driver>) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/NetworkDriver.GetCapabilities", post(get_capabilities))
        .route("/NetworkDriver.CreateNetwork", post(create_network))
        .route("/NetworkDriver.DeleteNetwork", post(delete_network))
        .route("/NetworkDriver.AllocateNetwork", post(allocate_network))
        .route("/NetworkDriver.FreeNetwork", post(free_network))
        .route("/NetworkDriver.CreateEndpoint", post(create_endpoint))
        .route("/NetworkDriver.DeleteEndpoint", post(delete_endpoint))
        .route("/NetworkDriver.EndpointOperInfo", post(endpoint_oper_info))
        .route("/NetworkDriver.Join", post(join))
        .route("/NetworkDriver.Leave", post(leave))
        .route("/NetworkDriver.DiscoverNew", post(discover_new))
        .route("/NetworkDriver.DiscoverDelete", post(discover_delete))
        .route(
            "/NetworkDriver.ProgramExternalConnectivity",
            post(program_external_connectivity),
        )
        .route(
            "/NetworkDriver.RevokeExternalConnectivity",
            post(revoke_external_connectivity),
        )
        .fallback(unknown)
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

async fn activate() -> ApiResult {
    debug!("Plugin activated");
    ok(&ActivateResponse::default())
}

async fn get_capabilities(State(driver): State<Arc<Driver>>) -> ApiResult {
    let scope = driver.capabilities().to_string();
    ok(&CapabilitiesResponse {
        connectivity_scope: scope.clone(),
        scope,
    })
}

async fn create_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: CreateNetworkRequest = parse(&body)?;
    driver.create_network(&req).await?;
    empty()
}

async fn delete_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: NetworkRequest = parse(&body)?;
    driver.delete_network(&req.network_id).await?;
    empty()
}

async fn allocate_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: AllocateNetworkRequest = parse(&body)?;
    let options = driver.allocate_network(&req).await;
    ok(&AllocateNetworkResponse { options })
}

async fn free_network(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: NetworkRequest = parse(&body)?;
    driver.free_network(&req.network_id).await;
    empty()
}

async fn create_endpoint(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: CreateEndpointRequest = parse(&body)?;
    let mac = driver.create_endpoint(&req).await?;

    // the engine refuses a reply that overrides a MAC it supplied
    let supplied = req
        .interface
        .as_ref()
        .is_some_and(|iface| !iface.mac_address.is_empty());
    let interface = (!supplied).then(|| EndpointInterface {
        mac_address: mac,
        ..Default::default()
    });
    ok(&CreateEndpointResponse { interface })
}

async fn delete_endpoint(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: EndpointRequest = parse(&body)?;
    driver.delete_endpoint(&req.network_id, &req.endpoint_id).await?;
    empty()
}

async fn endpoint_oper_info(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: EndpointRequest = parse(&body)?;
    let value = driver.endpoint_info(&req.endpoint_id).await?;
    ok(&InfoResponse { value })
}

async fn join(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: JoinRequest = parse(&body)?;
    let resp: JoinResponse = driver
        .join(&req.network_id, &req.endpoint_id, &req.sandbox_key)
        .await?;
    ok(&resp)
}

async fn leave(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: EndpointRequest = parse(&body)?;
    driver.leave(&req.network_id, &req.endpoint_id).await?;
    empty()
}

async fn discover_new(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let notification: DiscoveryNotification = parse(&body)?;
    driver.discover_new(&notification).await;
    empty()
}

async fn discover_delete(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let notification: DiscoveryNotification = parse(&body)?;
    driver.discover_delete(&notification).await;
    empty()
}

async fn program_external_connectivity(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: ProgramExternalConnectivityRequest = parse(&body)?;
    driver.program_external_connectivity(&req).await;
    empty()
}

async fn revoke_external_connectivity(State(driver): State<Arc<Driver>>, body: Bytes) -> ApiResult {
    let req: EndpointRequest = parse(&body)?;
    driver
        .revoke_external_connectivity(&req.network_id, &req.endpoint_id)
        .await;
    empty()
}

async fn unknown(uri: Uri) -> Response {
    warn!("Unsupported plugin call {}", uri.path());
    plugin_response(
        StatusCode::NOT_FOUND,
        &ErrorResponse {
            err: format!("unsupported call {}", uri.path()),
        },
    )
}
