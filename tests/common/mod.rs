//! Shared end-to-end test harness: boots a real `gotty_rs` server on an
//! ephemeral loopback port and hands back its address plus the `AppState`
//! so tests can drive it with a genuine WebSocket client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use gotty_rs::{AppState, Config};

/// Spin up the HTTP/WebSocket server on `127.0.0.1:0` and accept
/// connections in a background task until the admission manager begins
/// shutdown. Returns the bound address and a handle to the shared state
/// (so tests can call `state.admission.exit()` to stop it).
pub async fn spawn_server(config: Config) -> (SocketAddr, Arc<AppState>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");

    let state = Arc::new(AppState::new(config));
    state.admission.start_idle_timer();

    let admission = Arc::clone(&state.admission);
    let accept_state = Arc::clone(&state);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = admission.wait_for_shutdown() => break,
                accepted = listener.accept(), if admission.is_accepting() => {
                    if let Ok((stream, remote_addr)) = accepted {
                        let state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            let service = service_fn(move |req: Request<Incoming>| {
                                let state = Arc::clone(&state);
                                async move {
                                    let response: Result<_, Infallible> =
                                        gotty_rs::http::handle(req, state, remote_addr).await;
                                    response
                                }
                            });
                            let io = TokioIo::new(stream);
                            let _ = hyper::server::conn::http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades()
                                .await;
                        });
                    }
                }
            }
        }
    });

    (addr, state)
}

/// Build a bare-bones config for a test scenario: a given command, with
/// writes permitted, binding to loopback only.
pub fn test_config(command: Vec<&str>) -> Config {
    let mut config = Config::default();
    config.command = command.into_iter().map(str::to_string).collect();
    config.permit_write = true;
    config
}
