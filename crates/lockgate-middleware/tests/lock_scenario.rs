//! End-to-end relay scenario against a local WebSocket "lock controller".

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lockgate_middleware::{
    CommandRelay, ReconnectSupervisor, SessionHandle, SessionRegistry, UpstreamLink,
};
use lockgate_types::{ERR_NOT_CONNECTED, LOCK_CONNECTED, LOCK_DISCONNECTED, LinkSettings};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

async fn next_payload(session: &mut SessionHandle) -> String {
    timeout(WAIT, session.outbox.recv())
        .await
        .expect("timed out waiting for a relayed message")
        .expect("session outbox closed")
        .payload
}

#[tokio::test]
async fn connect_relay_drop_and_recover() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
    let (drop_tx, drop_rx) = oneshot::channel::<()>();
    let (reaccept_tx, reaccept_rx) = oneshot::channel::<()>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    // Scripted controller: announce, echo one command, vanish, come back.
    let controller = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text("DOOR_OPENED".into())).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                seen_tx.send(text.as_str().to_string()).unwrap();
                break;
            }
        }
        drop_rx.await.unwrap();
        drop(ws);

        reaccept_rx.await.unwrap();
        // Connects that timed out while we were away fail their handshake.
        let mut held = Vec::new();
        let mut done_rx = done_rx;
        loop {
            tokio::select! {
                _ = &mut done_rx => break,
                accepted = listener.accept() => {
                    let (stream, _) = accepted.unwrap();
                    if let Ok(ws) = accept_async(stream).await {
                        held.push(ws);
                    }
                }
            }
        }
    });

    let settings = LinkSettings {
        endpoint: format!("ws://{addr}/ws"),
        connect_timeout: Duration::from_millis(300),
        receive_timeout: Duration::from_millis(100),
        retry_interval: Duration::from_millis(200),
    };
    let link = Arc::new(UpstreamLink::websocket(&settings));
    let registry = Arc::new(SessionRegistry::default());
    let relay = CommandRelay::new(Arc::clone(&link), registry.clone());
    let mut session = registry.join().await;
    let mut bystander = registry.join().await;

    let cancel = CancellationToken::new();
    let supervisor =
        ReconnectSupervisor::new(Arc::clone(&link), registry.clone(), &settings).spawn(cancel.clone());

    assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
    assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
    assert_eq!(next_payload(&mut session).await, "DOOR_OPENED");
    assert_eq!(next_payload(&mut bystander).await, LOCK_DISCONNECTED);
    assert_eq!(next_payload(&mut bystander).await, LOCK_CONNECTED);
    assert_eq!(next_payload(&mut bystander).await, "DOOR_OPENED");

    let reply = relay.handle_command(session.id, "UNLOCK").await;
    assert_eq!(reply, "OK: Sent UNLOCK to Door Lock");
    assert_eq!(next_payload(&mut session).await, reply);
    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap().as_deref(), Some("UNLOCK"));

    drop_tx.send(()).unwrap();
    assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
    assert_eq!(next_payload(&mut bystander).await, LOCK_DISCONNECTED);

    let reply = relay.handle_command(session.id, "UNLOCK").await;
    assert_eq!(reply, ERR_NOT_CONNECTED);
    assert_eq!(next_payload(&mut session).await, ERR_NOT_CONNECTED);

    reaccept_tx.send(()).unwrap();
    assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
    // The bystander saw neither the acknowledgement nor the error.
    assert_eq!(next_payload(&mut bystander).await, LOCK_CONNECTED);

    cancel.cancel();
    timeout(WAIT, supervisor).await.unwrap().unwrap();
    let _ = done_tx.send(());
    controller.await.unwrap();
}
