//! The Bridge: full-duplex pump between one WebSocket peer and one PTY
//! master, plus control frames (resize, ping) and teardown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portable_pty::MasterPty;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::frame::{ClientFrame, FrameError, ServerFrame};
use crate::pty::{self, PtyHandle};
use crate::template::{Template, TitleVars};

/// How long teardown waits for the child to exit gracefully after
/// `CloseSignal` before escalating to SIGKILL.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

/// One running session: a WebSocket peer coupled to a PTY-backed child.
///
/// The WebSocket is split into its sink and stream halves at construction:
/// the sink is shared (mutex-guarded) so every writer funnels through one
/// serializer, while the stream half is owned outright by the WS->PTY pump,
/// since only one task ever reads from it.
pub struct Bridge<S> {
    ws_sink: Arc<Mutex<WsSink<S>>>,
    ws_stream: SplitStream<WebSocketStream<S>>,
    pty: PtyHandle,
    permit_write: bool,
    close_signal: i32,
}

impl<S> Bridge<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, pty: PtyHandle, config: &Config) -> Self {
        let (sink, stream) = ws.split();
        Self {
            ws_sink: Arc::new(Mutex::new(sink)),
            ws_stream: stream,
            pty,
            permit_write: config.permit_write,
            close_signal: config.close_signal,
        }
    }

    /// Send the fixed sequence of initialization frames: window title,
    /// preferences, and (if enabled) the reconnect hint.
    pub async fn send_init_frames(
        &self,
        config: &Config,
        title_template: &Template,
        vars: &TitleVars,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let title = title_template.render(vars);
        self.send(ServerFrame::SetWindowTitle(title)).await?;
        self.send(ServerFrame::SetPreferences(config.preferences.clone()))
            .await?;
        if config.enable_reconnect {
            self.send(ServerFrame::SetReconnect(config.reconnect_time))
                .await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        frame: ServerFrame,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let mut sink = self.ws_sink.lock().await;
        sink.send(Message::Text(frame.encode())).await
    }

    /// Run the bridge until either pump terminates, then tear down.
    ///
    /// The two pumps are driven by independent `&mut` borrows of disjoint
    /// fields (the PTY's channels/master vs. the shared, mutex-guarded
    /// WebSocket sink and the uniquely-owned WebSocket stream) rather than
    /// by two `&mut self` method calls, since the latter cannot coexist as
    /// simultaneously-live futures under one `tokio::select!`.
    pub async fn run(mut self) {
        let permit_write = self.permit_write;
        let pty_to_ws = pump_pty_to_ws(&mut self.pty.output_rx, Arc::clone(&self.ws_sink));
        let ws_to_pty = pump_ws_to_pty(
            &mut self.ws_stream,
            Arc::clone(&self.ws_sink),
            &mut self.pty.input_tx,
            self.pty.master.as_ref(),
            permit_write,
        );

        tokio::select! {
            _ = pty_to_ws => debug!("bridge: PTY->WS pump ended"),
            _ = ws_to_pty => debug!("bridge: WS->PTY pump ended"),
        }

        self.teardown().await;
    }

    async fn teardown(&mut self) {
        pty::signal_child(self.pty.pid, self.close_signal);

        tokio::select! {
            _ = &mut self.pty.exit_rx => {
                debug!("bridge: child exited during teardown grace period");
            }
            _ = sleep(CLOSE_GRACE) => {
                warn!("bridge: child did not exit within grace period, sending SIGKILL");
                pty::signal_child(self.pty.pid, 9);
                let _ = (&mut self.pty.exit_rx).await;
            }
        }

        let mut sink = self.ws_sink.lock().await;
        let _ = sink.close().await;
        info!("bridge: session torn down");
    }
}

/// PTY->WS pump: read chunks from the PTY output channel and emit each as
/// an `Output` frame. Ends on channel close (PTY EOF/error) or a WS send
/// error.
async fn pump_pty_to_ws<S>(
    output_rx: &mut mpsc::Receiver<Vec<u8>>,
    ws_sink: Arc<Mutex<WsSink<S>>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    while let Some(chunk) = output_rx.recv().await {
        if chunk.is_empty() {
            continue;
        }
        let frame = ServerFrame::Output(chunk);
        let mut sink = ws_sink.lock().await;
        if let Err(e) = sink.send(Message::Text(frame.encode())).await {
            debug!(error = %e, "bridge: PTY->WS send failed, ending pump");
            break;
        }
    }
}

/// WS->PTY pump: read frames from the peer and dispatch by tag. INPUT
/// writes to the PTY only when `permit_write` is set (otherwise the bytes
/// are silently dropped); PING gets an immediate PONG; RESIZE calls
/// `pty::resize`; unknown tags are ignored. Ends on WS read error/close or
/// a closed PTY input channel.
async fn pump_ws_to_pty<S>(
    ws_stream: &mut SplitStream<WebSocketStream<S>>,
    ws_sink: Arc<Mutex<WsSink<S>>>,
    input_tx: &mut mpsc::Sender<Vec<u8>>,
    master: &dyn MasterPty,
    permit_write: bool,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "bridge: WS read error, ending pump");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                debug!("bridge: client closed WebSocket");
                break;
            }
            _ => continue,
        };

        match ClientFrame::decode(&text) {
            Ok(Some(ClientFrame::Input(data))) => {
                if permit_write && input_tx.send(data.into_bytes()).await.is_err() {
                    debug!("bridge: PTY input channel closed, ending pump");
                    break;
                }
            }
            Ok(Some(ClientFrame::Ping)) => {
                let mut sink = ws_sink.lock().await;
                if let Err(e) = sink.send(Message::Text(ServerFrame::Pong.encode())).await {
                    debug!(error = %e, "bridge: PONG send failed, ending pump");
                    break;
                }
            }
            Ok(Some(ClientFrame::Resize { columns, rows })) => {
                pty::resize(master, columns, rows);
            }
            Ok(None) => {
                // Unknown tag: ignored per the wire protocol contract.
            }
            Err(FrameError::Empty) => {
                // Empty frame: nothing to dispatch.
            }
            Err(e) => {
                warn!(error = %e, "bridge: malformed client frame");
            }
        }
    }
}
