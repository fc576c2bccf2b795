//! End-to-end scenarios: a real server bound to an ephemeral loopback port,
//! driven by a genuine WebSocket client. Mirrors the scenarios called out in
//! the design's testable-properties section.

mod common;

use std::time::Duration;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use common::{spawn_server, test_config};

fn init_frame(auth_token: &str) -> Message {
    Message::Text(
        serde_json::json!({ "Arguments": "", "AuthToken": auth_token }).to_string(),
    )
}

/// Scenario 1: an echoing child ("cat") with writes permitted. Input typed
/// by the client must be observed, byte-for-byte, in the decoded output.
#[tokio::test]
async fn echo_session_round_trips_input() {
    let config = test_config(vec!["cat"]);
    let (addr, _state) = spawn_server(config).await;

    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = timeout(Duration::from_secs(5), tokio_tungstenite::connect_async(&url))
        .await
        .expect("connect did not time out")
        .expect("websocket handshake");

    ws.send(init_frame("")).await.expect("send init");

    // Drain the fixed init-frame sequence (SetWindowTitle, SetPreferences).
    for _ in 0..2 {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("init frame timeout")
            .expect("stream open")
            .expect("no ws error");
        let text = msg.into_text().expect("text frame");
        assert!(text.starts_with('2') || text.starts_with('3'));
    }

    ws.send(Message::Text("0hello\n".to_string()))
        .await
        .expect("send input");

    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let Ok(Some(Ok(msg))) = timeout(Duration::from_secs(1), ws.next()).await else {
            continue;
        };
        if let Ok(text) = msg.into_text() {
            if let Some(payload) = text.strip_prefix('0') {
                if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(payload) {
                    collected.extend_from_slice(&bytes);
                }
            }
        }
        if collected.windows(6).any(|w| w == b"hello\n") {
            break;
        }
    }

    assert!(
        collected.windows(6).any(|w| w == b"hello\n"),
        "expected echoed bytes to contain hello\\n, got {:?}",
        String::from_utf8_lossy(&collected)
    );
}

/// Scenario 3: in `once` mode, exactly one of two concurrent clients is
/// admitted; the other's WebSocket never receives a server-initiated frame.
#[tokio::test]
async fn once_mode_admits_exactly_one_session() {
    let mut config = test_config(vec!["cat"]);
    config.once = true;
    let (addr, _state) = spawn_server(config).await;
    let url = format!("ws://{addr}/ws");

    let first = tokio_tungstenite::connect_async(&url).await;
    let second = tokio_tungstenite::connect_async(&url).await;

    // Exactly one of the two upgrade attempts must succeed; in `once` mode
    // the loser is rejected at admission, before the WebSocket upgrade.
    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one connection should be admitted");

    if let Ok((mut ws, _)) = first {
        ws.send(init_frame("")).await.ok();
        let msg = timeout(Duration::from_secs(5), ws.next()).await;
        assert!(msg.is_ok(), "the admitted session should receive init frames");
    } else if let Ok((mut ws, _)) = second {
        ws.send(init_frame("")).await.ok();
        let msg = timeout(Duration::from_secs(5), ws.next()).await;
        assert!(msg.is_ok(), "the admitted session should receive init frames");
    }
}

/// Scenario 4: with `max_connection = 2`, a third concurrent client is
/// rejected without ever reaching the PTY spawn.
#[tokio::test]
async fn max_connection_rejects_beyond_the_cap() {
    let mut config = test_config(vec!["sleep", "5"]);
    config.max_connection = 2;
    let (addr, _state) = spawn_server(config).await;
    let url = format!("ws://{addr}/ws");

    let a = tokio_tungstenite::connect_async(&url).await;
    let b = tokio_tungstenite::connect_async(&url).await;
    let c = tokio_tungstenite::connect_async(&url).await;

    let successes = [&a, &b, &c].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 2, "only two of three connections should be admitted");
}

/// Scenario 6: with no live sessions and a short idle timeout, the server
/// begins graceful shutdown on its own.
#[tokio::test]
async fn idle_timeout_triggers_shutdown_with_no_sessions() {
    let mut config = test_config(vec!["cat"]);
    config.timeout = 1;
    let (_addr, state) = spawn_server(config).await;

    timeout(Duration::from_secs(5), state.admission.wait_for_shutdown())
        .await
        .expect("idle timeout should trigger shutdown within the deadline");
    assert!(!state.admission.is_accepting());
}
