//! HTTP routing: Basic-Auth gate, static assets, the `/ws` upgrade, and the
//! `/rexec` one-shot exec endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use tracing::{info_span, warn, Instrument};

use crate::auth::{self, AuthResult, REALM};
use crate::exec::{self, ExecRequest};
use crate::session::{self, ResponseBody};
use crate::state::AppState;

const SERVER_HEADER: &str = concat!("GoTTY/", env!("CARGO_PKG_VERSION"));

/// Top-level request handler, wired into `hyper::service::service_fn` per
/// accepted connection. Applies Basic Auth uniformly, then dispatches.
pub async fn handle(
    req: Request<Incoming>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<Response<ResponseBody>, std::convert::Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = info_span!("request", %remote_addr, %method, %path);

    async move {
        let mut response = route(req, &state, remote_addr).await;
        response
            .headers_mut()
            .insert("Server", SERVER_HEADER.parse().unwrap());
        Ok(response)
    }
    .instrument(span)
    .await
}

async fn route(
    req: Request<Incoming>,
    state: &Arc<AppState>,
    remote_addr: SocketAddr,
) -> Response<ResponseBody> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match auth::check_basic_auth(&state.config, auth_header.as_deref()) {
        AuthResult::Authenticated | AuthResult::NoAuthRequired => {}
        AuthResult::Failed(_) => return unauthorized_response(),
    }

    let full_path = req.uri().path().to_string();
    let Some(path) = state.strip_prefix(&full_path) else {
        return session::empty_response(StatusCode::NOT_FOUND);
    };

    match (req.method(), path) {
        (&Method::GET, "/ws") => session::handle_upgrade(req, Arc::clone(state), remote_addr).await,
        (&Method::GET, "/") | (&Method::GET, "/index.html") => serve_asset(state, "index.html"),
        (&Method::GET, "/favicon.png") => serve_asset(state, "favicon.png"),
        (&Method::GET, "/auth_token.js") => {
            let body = state.assets.auth_token_js(&state.config);
            js_response(body)
        }
        (&Method::GET, p) if p.starts_with("/js/") => serve_asset(state, p.trim_start_matches('/')),
        (&Method::POST, "/rexec") => handle_rexec(req, state).await,
        (_, "/rexec") => session::empty_response(StatusCode::OK),
        _ => session::empty_response(StatusCode::NOT_FOUND),
    }
}

fn serve_asset(state: &Arc<AppState>, path: &str) -> Response<ResponseBody> {
    match state.assets.open(path) {
        Some(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes.into_owned())).boxed());
            response
                .headers_mut()
                .insert(CONTENT_TYPE, content_type_for(path).parse().unwrap());
            response
        }
        None => session::empty_response(StatusCode::NOT_FOUND),
    }
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".html") {
        "text/html; charset=utf-8"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".png") {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

fn js_response(body: String) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/javascript".parse().unwrap());
    response
}

async fn handle_rexec(req: Request<Incoming>, state: &Arc<AppState>) -> Response<ResponseBody> {
    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "rexec: failed to read request body");
            return json_error_response(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let request: ExecRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "rexec: malformed JSON");
            return json_error_response(StatusCode::BAD_REQUEST, "malformed JSON request");
        }
    };

    let result = exec::run(&state.config, request).await;
    let body = serde_json::to_vec(&result).unwrap_or_default();

    let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    add_cors_headers(&mut response);
    response
}

fn add_cors_headers(response: &mut Response<ResponseBody>) {
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", "*".parse().unwrap());
    headers.insert(
        "Access-Control-Allow-Methods",
        "GET, POST, OPTIONS".parse().unwrap(),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        "Content-Type, Authorization".parse().unwrap(),
    );
}

fn json_error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().unwrap());
    response
}

fn unauthorized_response() -> Response<ResponseBody> {
    let mut response = Response::new(Empty::new().boxed());
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        format!("Basic realm=\"{REALM}\"").parse().unwrap(),
    );
    response
}
