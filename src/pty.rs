//! PTY Adapter: spawn a child process attached to a fresh PTY, resize its
//! window, signal it, and reap it.

use std::io::{Read, Write};
use std::thread;

use nix::sys::signal::{kill, Signal};
use nix::unistd::{Group, Pid, User};
use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Config;

/// Result of spawning a PTY-backed child: channels for full-duplex I/O plus
/// a resize handle and a handle for signaling/reaping.
pub struct PtyHandle {
    /// Channel carrying bytes to be written to the PTY.
    pub input_tx: mpsc::Sender<Vec<u8>>,
    /// Channel carrying bytes read from the PTY.
    pub output_rx: mpsc::Receiver<Vec<u8>>,
    /// The PTY master, retained to perform resizes.
    pub master: Box<dyn MasterPty + Send>,
    /// Process id of the spawned child, used for signal delivery.
    pub pid: Option<u32>,
    /// Resolves once the waiter thread observes the child exit.
    pub exit_rx: oneshot::Receiver<ExitStatus>,
}

/// Resolve a `user` name to a `(uid, gid)` pair via `nix`. Falls back to
/// `(0, 0)` (running as root) with a logged warning if the lookup fails,
/// matching the documented, deliberately-preserved fail-open-to-root source
/// behavior (see SPEC_FULL.md Open Question 4).
pub fn resolve_user(run_as_user: Option<&str>) -> (u32, u32) {
    let Some(name) = run_as_user else {
        return (0, 0);
    };
    match User::from_name(name) {
        Ok(Some(user)) => {
            let gid = user.gid.as_raw();
            (user.uid.as_raw(), gid)
        }
        Ok(None) => {
            warn!(user = name, "run_as_user not found, falling back to root");
            (0, 0)
        }
        Err(e) => {
            warn!(user = name, error = %e, "uid/gid lookup failed, falling back to root");
            (0, 0)
        }
    }
}

/// Look up a named group's gid, used only when a config wants to pin a group
/// distinct from the resolved user's primary group.
pub fn resolve_group(name: &str) -> Option<u32> {
    Group::from_name(name).ok().flatten().map(|g| g.gid.as_raw())
}

/// Spawn `argv[0] argv[1..]` attached to a fresh PTY of the given size,
/// running as the uid/gid resolved from `config.run_as_user`.
pub fn spawn_pty(
    config: &Config,
    argv: &[String],
    cols: u16,
    rows: u16,
) -> Result<PtyHandle, PtySpawnError> {
    let pty_system = native_pty_system();

    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };

    let pair = pty_system
        .openpty(size)
        .map_err(|e| PtySpawnError::OpenFailed(e.to_string()))?;

    let program = argv.first().ok_or(PtySpawnError::EmptyArgv)?;
    let mut cmd = CommandBuilder::new(program);
    cmd.args(&argv[1..]);
    cmd.env("TERM", "xterm-256color");

    let (uid, gid) = resolve_user(config.run_as_user.as_deref());
    cmd.uid(uid);
    cmd.gid(gid);

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtySpawnError::SpawnFailed(e.to_string()))?;
    let pid = child.process_id();

    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtySpawnError::IoSetupFailed(e.to_string()))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| PtySpawnError::IoSetupFailed(e.to_string()))?;

    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(64);

    // PTY reads block on a dedicated OS thread; forwarded into the async
    // world through a channel, matching the teacher's thread-per-direction
    // bridging of portable-pty's synchronous I/O traits.
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!("PTY reader: EOF");
                    break;
                }
                Ok(n) => {
                    if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        debug!("PTY reader: output channel closed");
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "PTY read error");
                    break;
                }
            }
        }
    });

    thread::spawn(move || {
        while let Some(data) = input_rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data) {
                error!(error = %e, "PTY write error");
                break;
            }
            let _ = writer.flush();
        }
        debug!("PTY writer: input channel closed");
    });

    let (exit_tx, exit_rx) = oneshot::channel();
    thread::spawn(move || match child.wait() {
        Ok(status) => {
            let _ = exit_tx.send(status);
        }
        Err(e) => {
            error!(error = %e, "failed to reap PTY child");
        }
    });

    info!(program = %program, cols, rows, uid, gid, "spawned PTY child");

    Ok(PtyHandle {
        input_tx,
        output_rx,
        master: pair.master,
        pid,
        exit_rx,
    })
}

/// Resize the PTY window. Non-fatal on failure: logged and swallowed.
pub fn resize(master: &dyn MasterPty, cols: u16, rows: u16) {
    let size = PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    if let Err(e) = master.resize(size) {
        warn!(error = %e, cols, rows, "PTY resize failed");
    }
}

/// Deliver a POSIX signal to the child by pid, as configured via
/// `close_signal`. A `None` pid (platforms without a numeric pid) is a no-op.
pub fn signal_child(pid: Option<u32>, sig: i32) {
    let Some(pid) = pid else {
        return;
    };
    match Signal::try_from(sig) {
        Ok(signal) => {
            if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
                warn!(pid, sig, error = %e, "failed to signal child");
            }
        }
        Err(e) => warn!(sig, error = %e, "invalid close_signal"),
    }
}

#[derive(Debug, Clone)]
pub enum PtySpawnError {
    EmptyArgv,
    OpenFailed(String),
    SpawnFailed(String),
    IoSetupFailed(String),
}

impl std::fmt::Display for PtySpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyArgv => write!(f, "command argv is empty"),
            Self::OpenFailed(e) => write!(f, "failed to open PTY: {e}"),
            Self::SpawnFailed(e) => write!(f, "failed to spawn command: {e}"),
            Self::IoSetupFailed(e) => write!(f, "failed to set up PTY I/O: {e}"),
        }
    }
}

impl std::error::Error for PtySpawnError {}
