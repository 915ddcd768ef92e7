use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tickproxy_core::{AssetClass, SeriesRequest, ValidationError};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::CredentialInput;
use crate::config::AllowedOrigins;
use crate::error::ProxyError;
use crate::rate_limit::ClientIdentity;
use crate::AppState;

pub const SOURCE_HEADER: HeaderName = HeaderName::from_static("x-tickproxy-source");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/api/health", get(health))
        .route("/health", get(health))
        .route("/api/download", get(download))
        .route("/api/saved", get(saved))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([
            header::RETRY_AFTER,
            header::WWW_AUTHENTICATE,
            SOURCE_HEADER,
            REQUEST_ID_HEADER,
        ]);

    match origins {
        // Credentials cannot be combined with a wildcard origin.
        AllowedOrigins::Any => layer.allow_origin(Any),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(%origin, "ignoring unusable CORS origin");
                        None
                    }
                })
                .collect();
            layer
                .allow_origin(AllowOrigin::list(values))
                .allow_credentials(true)
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub symbol: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub period: Option<String>,
    pub interval: Option<String>,
    #[serde(rename = "assetType", alias = "asset_type")]
    pub asset_type: Option<String>,
    pub save: Option<String>,
    #[serde(rename = "bustCache", alias = "bust_cache")]
    pub bust_cache: Option<String>,
}

impl DownloadParams {
    fn into_request(self) -> Result<SeriesRequest, ValidationError> {
        let asset = match self.asset_type.as_deref().map(str::trim) {
            Some(value) if !value.is_empty() => value.parse::<AssetClass>()?,
            _ => AssetClass::default(),
        };
        let request = SeriesRequest::parse_for_asset(
            asset,
            self.symbol.as_deref().unwrap_or_default(),
            self.start.as_deref(),
            self.end.as_deref(),
            self.period.as_deref(),
            self.interval.as_deref(),
        )?;
        Ok(request
            .with_force_refresh(is_truthy(self.bust_cache.as_deref()))
            .with_save(is_truthy(self.save.as_deref())))
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn credential_from(headers: &HeaderMap) -> CredentialInput {
    let header = headers.get(header::AUTHORIZATION);
    match header.map(HeaderValue::to_str) {
        None => CredentialInput::Absent,
        Some(Ok(value)) => CredentialInput::from_authorization(Some(value)),
        Some(Err(_)) => CredentialInput::Malformed,
    }
}

fn client_from(connect: Option<ConnectInfo<SocketAddr>>) -> ClientIdentity {
    ClientIdentity::from_addr(connect.map(|ConnectInfo(addr)| addr.ip()))
}

async fn download(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let params = params.map(|Query(params)| params);
    let symbol = params
        .as_ref()
        .ok()
        .and_then(|params| params.symbol.clone())
        .unwrap_or_default();
    let span = tracing::info_span!("download", %request_id, %symbol);

    let mut response = serve_download(&state, connect, &headers, params)
        .instrument(span)
        .await
        .unwrap_or_else(IntoResponse::into_response);

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn serve_download(
    state: &AppState,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: &HeaderMap,
    params: Result<DownloadParams, QueryRejection>,
) -> Result<Response, ProxyError> {
    let credential = credential_from(headers);
    let client = client_from(connect);

    // Malformed requests still pass the gates so they cannot probe past auth.
    let parsed = params
        .map_err(|rejection| ProxyError::MalformedQuery(rejection.body_text()))
        .and_then(|params| params.into_request().map_err(ProxyError::from));
    let request = match parsed {
        Ok(request) => request,
        Err(error) => {
            state.endpoint.admit(&credential, &client)?;
            return Err(error);
        }
    };

    let outcome = state.endpoint.handle(request, &credential, &client).await?;
    let body = outcome.to_csv()?;
    tracing::info!(
        source = outcome.served_from.as_str(),
        rows = outcome.table.len(),
        "download served"
    );

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
            (SOURCE_HEADER, HeaderValue::from_static(outcome.served_from.as_str())),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct SavedFiles {
    files: Vec<String>,
}

async fn saved(
    State(state): State<Arc<AppState>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<SavedFiles>, ProxyError> {
    state
        .endpoint
        .admit(&credential_from(&headers), &client_from(connect))?;
    let files = state.endpoint.store().list_snapshots().await?;
    Ok(Json(SavedFiles { files }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::future::Future;
    use std::pin::Pin;
    use tickproxy_core::{FetchOutcome, UpstreamClient};
    use tower::ServiceExt;

    struct Unreachable;

    impl UpstreamClient for Unreachable {
        fn fetch_series<'a>(
            &'a self,
            _request: &'a SeriesRequest,
        ) -> Pin<Box<dyn Future<Output = FetchOutcome> + Send + 'a>> {
            Box::pin(async { FetchOutcome::failed("offline") })
        }
    }

    fn app(dir: &std::path::Path) -> Router {
        let config = ProxyConfig {
            cache_dir: dir.join("cache"),
            snapshot_dir: dir.join("saved"),
            ..ProxyConfig::default()
        };
        router(AppState::new(config, Arc::new(Unreachable)))
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::get(uri).body(Body::empty()).expect("request builds"))
            .await
            .expect("router is infallible")
    }

    #[test]
    fn truthy_flags() {
        for value in ["1", "true", "TRUE", "yes", "on"] {
            assert!(is_truthy(Some(value)), "{value}");
        }
        for value in ["0", "false", "", "nope"] {
            assert!(!is_truthy(Some(value)), "{value}");
        }
        assert!(!is_truthy(None));
    }

    #[tokio::test]
    async fn health_is_ungated() {
        let dir = tempfile::tempdir().expect("tempdir");
        for uri in ["/api/health", "/health"] {
            let response = get(app(dir.path()), uri).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            assert_eq!(&body[..], br#"{"status":"ok"}"#);
        }
    }

    #[tokio::test]
    async fn invalid_parameters_are_bad_request_with_request_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = get(app(dir.path()), "/api/download?symbol=AAPL&interval=7m").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn undecodable_query_is_a_json_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = get(app(dir.path()), "/api/download?symbol=AAPL&symbol=MSFT").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn unknown_asset_type_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = get(app(dir.path()), "/api/download?symbol=EUR/USD&assetType=bonds").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_symbol_is_bad_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = get(app(dir.path()), "/api/download?period=1mo").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upstream_failure_without_snapshot_is_bad_gateway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let response = get(app(dir.path()), "/api/download?symbol=AAPL&period=1mo").await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json body");
        assert_eq!(json["detail"], "failed to fetch data for AAPL: offline");
    }
}
