//! gotty-rs entry point: parse configuration, bind the listener, and serve
//! HTTP + WebSocket connections until a graceful shutdown completes.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gotty_rs::{AppState, Cli, Config};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = match Config::assemble(cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };
    config.log_startup();

    let tls_acceptor = if config.enable_tls {
        match gotty_rs::tls::load_tls_config(&config) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                error!(error = %e, "failed to load TLS configuration");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    if config.address.is_empty() || config.address == "0.0.0.0" || config.address == "::" {
        for addr in gotty_rs::net::list_addresses() {
            info!(%addr, port = config.port, "listening on interface");
        }
    }

    let bind_addr = if config.address.is_empty() {
        format!("0.0.0.0:{}", config.port)
    } else {
        format!("{}:{}", config.address, config.port)
    };

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(address = %bind_addr, error = %e, "failed to bind listener");
            return ExitCode::FAILURE;
        }
    };
    info!(address = %bind_addr, "gotty-rs listening");

    let state = Arc::new(AppState::new(config));
    if !state.url_prefix.is_empty() {
        info!(prefix = %state.url_prefix, "random URL path enabled");
    }
    state.admission.start_idle_timer();

    let admission = Arc::clone(&state.admission);
    tokio::spawn({
        let admission = Arc::clone(&admission);
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            admission.exit();
        }
    });

    loop {
        tokio::select! {
            _ = admission.wait_for_shutdown() => {
                info!("all sessions drained, shutting down");
                break;
            }
            accepted = listener.accept(), if admission.is_accepting() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        spawn_connection(stream, remote_addr, Arc::clone(&state), tls_acceptor.clone());
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }
        }
    }

    ExitCode::SUCCESS
}

fn spawn_connection(
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
    state: Arc<AppState>,
    tls_acceptor: Option<tokio_rustls::TlsAcceptor>,
) {
    tokio::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let state = Arc::clone(&state);
            async move {
                let response: Result<_, Infallible> =
                    gotty_rs::http::handle(req, state, remote_addr).await;
                response
            }
        });

        let result = if let Some(acceptor) = tls_acceptor {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = TokioIo::new(tls_stream);
                    hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                }
                Err(e) => {
                    warn!(%remote_addr, error = %e, "TLS handshake failed");
                    return;
                }
            }
        } else {
            let io = TokioIo::new(stream);
            hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades()
                .await
        };

        if let Err(e) = result {
            warn!(%remote_addr, error = %e, "connection error");
        }
    });
}
