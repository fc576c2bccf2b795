//! gotty-rs: bridges a PTY-backed child process to browser terminals over WebSocket.

pub mod admission;
pub mod assets;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod exec;
pub mod frame;
pub mod http;
pub mod net;
pub mod pty;
pub mod session;
pub mod state;
pub mod template;
pub mod tls;

pub use admission::Admission;
pub use bridge::Bridge;
pub use config::{Cli, Config, ConfigError};
pub use frame::{ClientFrame, ServerFrame};
pub use pty::{spawn_pty, PtyHandle, PtySpawnError};
pub use session::SessionError;
pub use state::AppState;
