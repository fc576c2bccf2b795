//! Session Controller: upgrades a `/ws` request into a running Bridge.
//!
//! Implements the twelve-step admission sequence: method check, idle-timer
//! stop, admission, WebSocket upgrade, init-frame auth, argv assembly,
//! once-mode latching, PTY spawn, Bridge run, and teardown.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty, Full};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::admission::{AdmitRejection, AdmitResult};
use crate::auth::{self, AuthResult};
use crate::bridge::Bridge;
use crate::frame::InitMessage;
use crate::pty;
use crate::state::AppState;
use crate::template::TitleVars;

pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, std::convert::Infallible>;

/// Handle a `GET /ws` request: admit, upgrade, and hand off to a spawned
/// task that runs the Bridge for the lifetime of the session.
pub async fn handle_upgrade(
    mut req: Request<Incoming>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Response<ResponseBody> {
    if req.method() != hyper::Method::GET {
        return text_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    state.admission.stop_idle_timer();

    match state.admission.try_admit() {
        AdmitResult::Admitted => {}
        AdmitResult::Rejected(reason) => {
            warn!(?reason, %remote_addr, "session rejected at admission");
            if matches!(reason, AdmitRejection::ShuttingDown) {
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "server shutting down");
            }
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "connection limit reached");
        }
    }

    if !hyper_tungstenite::is_upgrade_request(&req) {
        return text_response(StatusCode::BAD_REQUEST, "expected a WebSocket upgrade");
    }

    let offers_gotty = req
        .headers()
        .get(hyper::header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|p| p.trim() == "gotty"));

    let (mut response, websocket) = match hyper_tungstenite::upgrade(&mut req, None) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "websocket upgrade failed");
            return text_response(StatusCode::BAD_REQUEST, "upgrade failed");
        }
    };

    // Echo the `gotty` subprotocol back so front-ends that require it on
    // the negotiated connection see it; harmless to omit if not offered.
    if offers_gotty {
        response.headers_mut().insert(
            hyper::header::SEC_WEBSOCKET_PROTOCOL,
            hyper::header::HeaderValue::from_static("gotty"),
        );
    }

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws_stream) => run_session(ws_stream, state, remote_addr).await,
            Err(e) => {
                warn!(error = %e, "websocket handshake failed after upgrade");
                state.admission.on_teardown();
            }
        }
    });

    response.map(|body| body.boxed())
}

async fn run_session<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let teardown_guard = TeardownGuard {
        admission: Arc::clone(&state.admission),
    };

    if let Err(e) = run_session_inner(ws_stream, &state, remote_addr).await {
        warn!(%remote_addr, error = %e, "session ended with error");
    }

    drop(teardown_guard);
}

/// Ensures `Admission::on_teardown` runs exactly once, even if
/// `run_session_inner` returns early via `?`.
struct TeardownGuard {
    admission: Arc<crate::admission::Admission>,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.admission.on_teardown();
    }
}

async fn run_session_inner<S>(
    mut ws_stream: tokio_tungstenite::WebSocketStream<S>,
    state: &Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<(), SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let init = read_init_message(&mut ws_stream).await?;

    if !matches!(
        auth::check_init_token(&state.config, &init.auth_token),
        AuthResult::Authenticated | AuthResult::NoAuthRequired
    ) {
        let _ = ws_stream.close(None).await;
        return Err(SessionError::AuthFailed);
    }

    let argv = build_argv(&state.config, &init.arguments);

    info!(%remote_addr, command = ?argv, "session admitted");

    let (cols, rows) = (
        if state.config.width > 0 { state.config.width } else { 80 },
        if state.config.height > 0 { state.config.height } else { 24 },
    );

    let pty_handle = pty::spawn_pty(&state.config, &argv, cols, rows)
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    let pid = pty_handle.pid;

    let bridge = Bridge::new(ws_stream, pty_handle, &state.config);

    let vars = TitleVars {
        command: argv.join(" "),
        hostname: gethostname::gethostname().to_string_lossy().into_owned(),
        remote_addr: remote_addr.to_string(),
        pid: pid.unwrap_or(0),
    };

    if bridge
        .send_init_frames(&state.config, &state.title_template, &vars)
        .await
        .is_err()
    {
        return Err(SessionError::InitFramesFailed);
    }

    bridge.run().await;
    Ok(())
}

async fn read_init_message<S>(
    ws_stream: &mut tokio_tungstenite::WebSocketStream<S>,
) -> Result<InitMessage, SessionError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match ws_stream.next().await {
        Some(Ok(Message::Text(text))) => {
            serde_json::from_str(&text).map_err(|e| SessionError::BadInit(e.to_string()))
        }
        Some(Ok(_)) => Err(SessionError::BadInit("expected a text init frame".to_string())),
        Some(Err(e)) => Err(SessionError::BadInit(e.to_string())),
        None => Err(SessionError::BadInit("connection closed before init".to_string())),
    }
}

/// Extend the configured base command with `?arg=...` values from the
/// client's `Arguments` query string, only when `permit_arguments` is set.
fn build_argv(config: &crate::config::Config, arguments: &str) -> Vec<String> {
    let mut argv = config.command.clone();
    if !config.permit_arguments || arguments.is_empty() {
        return argv;
    }
    let query = arguments.strip_prefix('?').unwrap_or(arguments);
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "arg" {
                argv.push(percent_decode(value));
            }
        }
    }
    argv
}

/// Minimal percent-decoder for query-string values; not a general-purpose
/// URI decoder, just enough for `?arg=` extras.
fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn text_response(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
    *response.status_mut() = status;
    response
}

pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Empty::new().boxed());
    *response.status_mut() = status;
    response
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("auth failed")]
    AuthFailed,
    #[error("malformed init message: {0}")]
    BadInit(String),
    #[error("PTY spawn failed: {0}")]
    SpawnFailed(String),
    #[error("failed to send init frames")]
    InitFramesFailed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn build_argv_without_permit_arguments_is_unchanged() {
        let mut config = Config::default();
        config.command = vec!["bash".to_string()];
        config.permit_arguments = false;
        let argv = build_argv(&config, "?arg=--verbose");
        assert_eq!(argv, vec!["bash".to_string()]);
    }

    #[test]
    fn build_argv_appends_arg_values_when_permitted() {
        let mut config = Config::default();
        config.command = vec!["bash".to_string()];
        config.permit_arguments = true;
        let argv = build_argv(&config, "?arg=--verbose&arg=--foo%20bar");
        assert_eq!(
            argv,
            vec!["bash".to_string(), "--verbose".to_string(), "--foo bar".to_string()]
        );
    }

    #[test]
    fn build_argv_ignores_unrelated_keys() {
        let mut config = Config::default();
        config.command = vec!["bash".to_string()];
        config.permit_arguments = true;
        let argv = build_argv(&config, "?session=abc&arg=x");
        assert_eq!(argv, vec!["bash".to_string(), "x".to_string()]);
    }

    #[test]
    fn percent_decode_handles_plus_and_hex() {
        assert_eq!(percent_decode("a+b%20c"), "a b c");
    }
}
