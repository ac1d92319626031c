//! HTTP transport for the OCSP responder
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /` | DER `OCSPRequest` body (`application/ocsp-request`) |
//! | `GET /{base64}` | URL-encoded base64 `OCSPRequest` (RFC 6960 Appendix A.1) |
//! | `GET /crl` | freshly generated DER CRL (`application/pkix-crl`) |
//! | `GET /health` | liveness |
//!
//! Each query runs on the blocking pool and is bounded by the configured timeout; a query that
//! does not finish in time is answered `tryLater` with `503 Service Unavailable`. Shutdown goes
//! through an [`axum_server::Handle`]: new connections stop immediately and in-flight requests
//! get the configured grace period.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use der::Encode;
use serde::Serialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::crl::CrlPublisher;
use crate::error::PkiError;
use crate::ocsp_responder::OcspResponder;
use crate::ocsp_types::{OcspResponse, OcspResponseStatus};

const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";
const CRL_CONTENT_TYPE: &str = "application/pkix-crl";
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Anything that turns a DER query into a DER response
pub trait QueryResponder: Send + Sync {
    fn respond(&self, request_der: &[u8]) -> Vec<u8>;
}

impl QueryResponder for OcspResponder {
    fn respond(&self, request_der: &[u8]) -> Vec<u8> {
        OcspResponder::respond(self, request_der)
    }
}

#[derive(Clone)]
pub struct AppState {
    /// `None` answers every query `unauthorized`
    pub responder: Option<Arc<dyn QueryResponder>>,
    pub crl: Option<Arc<CrlPublisher>>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub shutdown_grace: Duration,
    /// `(certificate chain, private key)` PEM paths; plain HTTP when `None`
    pub tls: Option<(PathBuf, PathBuf)>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ocsp_available: bool,
    crl_available: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(ocsp_post))
        .route("/crl", get(crl))
        .route("/health", get(health))
        .fallback(ocsp_get)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `handle` is told to shut down
pub async fn serve(settings: ServerSettings, state: AppState, handle: Handle) -> Result<()> {
    let app = router(state);
    match &settings.tls {
        Some((cert_path, key_path)) => {
            let config = RustlsConfig::from_pem_file(cert_path, key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS material from {} / {}",
                        cert_path.display(),
                        key_path.display()
                    )
                })?;
            tracing::info!(addr = %settings.addr, "OCSP responder listening (TLS)");
            axum_server::bind_rustls(settings.addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("OCSP responder failed")?;
        }
        None => {
            tracing::info!(addr = %settings.addr, "OCSP responder listening");
            axum_server::bind(settings.addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .context("OCSP responder failed")?;
        }
    }
    tracing::info!("OCSP responder stopped");
    Ok(())
}

/// Responder running on its own thread and Tokio runtime
pub struct BackgroundServer {
    handle: Handle,
    shutdown_grace: Duration,
    thread: JoinHandle<Result<()>>,
}

impl BackgroundServer {
    pub fn spawn(settings: ServerSettings, state: AppState) -> Result<Self> {
        let handle = Handle::new();
        let shutdown_grace = settings.shutdown_grace;
        let server_handle = handle.clone();
        let thread = std::thread::Builder::new()
            .name("ocsp-responder".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
                rt.block_on(serve(settings, state, server_handle))
            })
            .context("Failed to spawn responder thread")?;
        Ok(BackgroundServer {
            handle,
            shutdown_grace,
            thread,
        })
    }

    /// Stop accepting connections, let in-flight requests finish, then join
    pub fn shutdown(self) -> Result<()> {
        self.handle.graceful_shutdown(Some(self.shutdown_grace));
        self.thread
            .join()
            .map_err(|_| anyhow!("Responder thread panicked"))?
    }
}

async fn ocsp_post(State(state): State<AppState>, body: Bytes) -> Response {
    answer(&state, body.to_vec()).await
}

async fn ocsp_get(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let encoded = uri.path().trim_start_matches('/');
    let decoded = percent_encoding::percent_decode_str(encoded).collect::<Vec<u8>>();
    match STANDARD.decode(decoded) {
        Ok(der) => answer(&state, der).await,
        Err(e) => {
            tracing::info!(error = %e, "GET request is not base64");
            ocsp_error(StatusCode::OK, OcspResponseStatus::MalformedRequest)
        }
    }
}

async fn answer(state: &AppState, request_der: Vec<u8>) -> Response {
    let Some(responder) = state.responder.clone() else {
        return ocsp_error(StatusCode::OK, OcspResponseStatus::Unauthorized);
    };
    match query(responder, state.request_timeout, request_der).await {
        Ok(der) => ocsp_bytes(StatusCode::OK, der),
        Err(PkiError::ResponderTimeout(ms)) => {
            tracing::warn!(timeout_ms = ms, "OCSP query timed out, answering tryLater");
            ocsp_error(StatusCode::SERVICE_UNAVAILABLE, OcspResponseStatus::TryLater)
        }
        Err(e) => {
            tracing::error!(error = %e, "OCSP query failed");
            ocsp_error(StatusCode::INTERNAL_SERVER_ERROR, OcspResponseStatus::InternalError)
        }
    }
}

async fn query(
    responder: Arc<dyn QueryResponder>,
    timeout: Duration,
    request_der: Vec<u8>,
) -> crate::error::Result<Vec<u8>> {
    let task = tokio::task::spawn_blocking(move || responder.respond(&request_der));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(der)) => Ok(der),
        Ok(Err(e)) => Err(PkiError::Storage(std::io::Error::other(e.to_string()))),
        Err(_) => Err(PkiError::ResponderTimeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

async fn crl(State(state): State<AppState>) -> Response {
    let Some(publisher) = state.crl.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::task::spawn_blocking(move || publisher.publish()).await {
        Ok(Ok(crl)) => (
            [(header::CONTENT_TYPE, CRL_CONTENT_TYPE)],
            crl.to_der().to_vec(),
        )
            .into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "CRL generation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "CRL task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        ocsp_available: state.responder.is_some(),
        crl_available: state.crl.is_some(),
    })
}

fn ocsp_bytes(status: StatusCode, der: Vec<u8>) -> Response {
    (status, [(header::CONTENT_TYPE, OCSP_RESPONSE_CONTENT_TYPE)], der).into_response()
}

fn ocsp_error(status: StatusCode, response_status: OcspResponseStatus) -> Response {
    match OcspResponse::error(response_status).to_der() {
        Ok(der) => ocsp_bytes(status, der),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use der::Decode;
    use tower::ServiceExt;

    struct Echo;

    impl QueryResponder for Echo {
        fn respond(&self, request_der: &[u8]) -> Vec<u8> {
            request_der.to_vec()
        }
    }

    struct Slow;

    impl QueryResponder for Slow {
        fn respond(&self, _request_der: &[u8]) -> Vec<u8> {
            std::thread::sleep(Duration::from_millis(300));
            Vec::new()
        }
    }

    fn state(responder: Arc<dyn QueryResponder>, timeout: Duration) -> AppState {
        AppState {
            responder: Some(responder),
            crl: None,
            request_timeout: timeout,
        }
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_post_passes_body_through() {
        let app = router(state(Arc::new(Echo), Duration::from_secs(5)));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header(header::CONTENT_TYPE, "application/ocsp-request")
                    .body(Body::from(vec![1u8, 2, 3]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            OCSP_RESPONSE_CONTENT_TYPE
        );
        assert_eq!(body_bytes(response).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_decodes_url_encoded_base64() {
        let app = router(state(Arc::new(Echo), Duration::from_secs(5)));
        // base64 of fb ff fe is "+//+", url-encoded
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/%2B%2F%2F%2B")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, vec![0xfb, 0xff, 0xfe]);
    }

    #[tokio::test]
    async fn test_get_with_bad_base64_is_malformed() {
        let app = router(state(Arc::new(Echo), Duration::from_secs(5)));
        let response = app
            .oneshot(Request::builder().uri("/!!!").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_bytes(response).await;
        let decoded = OcspResponse::from_der(&body).unwrap();
        assert_eq!(decoded.response_status, OcspResponseStatus::MalformedRequest);
    }

    #[tokio::test]
    async fn test_timeout_answers_try_later() {
        let app = router(state(Arc::new(Slow), Duration::from_millis(20)));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(vec![0u8]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let decoded = OcspResponse::from_der(&body_bytes(response).await).unwrap();
        assert_eq!(decoded.response_status, OcspResponseStatus::TryLater);
    }

    #[tokio::test]
    async fn test_without_responder_is_unauthorized() {
        let app = router(AppState {
            responder: None,
            crl: None,
            request_timeout: Duration::from_secs(5),
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from(vec![0u8]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let decoded = OcspResponse::from_der(&body_bytes(response).await).unwrap();
        assert_eq!(decoded.response_status, OcspResponseStatus::Unauthorized);
    }

    #[tokio::test]
    async fn test_crl_route_without_publisher() {
        let app = router(state(Arc::new(Echo), Duration::from_secs(5)));
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/crl").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
