//! [`ReconnectSupervisor`] – keeps the lock controller link alive.
//!
//! A two-state control loop:
//!
//! | Phase | Behaviour |
//! |---|---|
//! | [`Phase::Reconnecting`] | `connect()`; on success broadcast `LOCK_CONNECTED` and start listening, otherwise wait the fixed retry interval and try again. |
//! | [`Phase::Listening`] | `receive_one(poll)`; relay each message to every session, loop on timeout, and on loss tear down, broadcast `LOCK_DISCONNECTED`, and go back to reconnecting. |
//!
//! There is no retry limit and no backoff growth.  The loop only ends when
//! its [`CancellationToken`] fires, after which the link is disconnected.

use std::sync::Arc;
use std::time::Duration;

use lockgate_types::{LinkSettings, LinkState, ReceiveError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::link::UpstreamLink;
use crate::registry::RelayBroadcaster;

/// Where the supervisor loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reconnecting,
    Listening,
}

/// Background task driving [`UpstreamLink`] connect/listen/reconnect.
pub struct ReconnectSupervisor {
    link: Arc<UpstreamLink>,
    broadcaster: Arc<dyn RelayBroadcaster>,
    receive_timeout: Duration,
    retry_interval: Duration,
}

impl ReconnectSupervisor {
    pub fn new(
        link: Arc<UpstreamLink>,
        broadcaster: Arc<dyn RelayBroadcaster>,
        settings: &LinkSettings,
    ) -> Self {
        Self {
            link,
            broadcaster,
            receive_timeout: settings.receive_timeout,
            retry_interval: settings.retry_interval,
        }
    }

    /// Run the loop on the Tokio runtime until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run the loop in the current task until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            endpoint = %self.link.endpoint(),
            retry_interval = ?self.retry_interval,
            receive_timeout = ?self.receive_timeout,
            "reconnect supervisor started"
        );

        let mut phase = Phase::Reconnecting;
        loop {
            phase = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.step(phase) => next,
            };
        }

        self.link.disconnect().await;
        info!("reconnect supervisor stopped");
    }

    async fn step(&self, phase: Phase) -> Phase {
        match phase {
            Phase::Reconnecting => self.reconnect_step().await,
            Phase::Listening => self.listen_step().await,
        }
    }

    async fn reconnect_step(&self) -> Phase {
        match self.link.connect().await {
            Ok(()) => {
                self.broadcaster.broadcast_status(LinkState::Connected).await;
                Phase::Listening
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?self.retry_interval, "Could not connect to Door Lock");
                tokio::time::sleep(self.retry_interval).await;
                Phase::Reconnecting
            }
        }
    }

    async fn listen_step(&self) -> Phase {
        match self.link.receive_one(self.receive_timeout).await {
            Ok(message) => {
                info!(payload = %message.payload, "Door Lock says");
                self.broadcaster.broadcast(message).await;
                Phase::Listening
            }
            Err(ReceiveError::Timeout) => Phase::Listening,
            Err(ReceiveError::ConnectionLost(reason)) => {
                error!(reason = %reason, "Lost connection to Door Lock");
                self.link.disconnect().await;
                self.broadcaster.broadcast_status(LinkState::Disconnected).await;
                Phase::Reconnecting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use lockgate_types::{LOCK_CONNECTED, LOCK_DISCONNECTED, RelayMessage, SessionId};
    use tokio::sync::Mutex;
    use tokio::time::{Instant, timeout};

    use super::*;
    use crate::link::memory::{MemoryConnector, Plan};
    use crate::registry::{SessionHandle, SessionRegistry};

    /// Joins one session after the link has flipped but before the status
    /// announcement reaches the registry.
    struct JoinDuringTransition {
        registry: Arc<SessionRegistry>,
        joined: Mutex<Option<SessionHandle>>,
    }

    #[async_trait]
    impl RelayBroadcaster for JoinDuringTransition {
        async fn broadcast(&self, message: RelayMessage) {
            self.registry.broadcast(message).await;
        }

        async fn broadcast_status(&self, state: LinkState) {
            let mut joined = self.joined.lock().await;
            if joined.is_none() {
                *joined = Some(self.registry.join().await);
            }
            drop(joined);
            self.registry.broadcast_status(state).await;
        }

        async fn notify_one(&self, session: SessionId, message: RelayMessage) -> bool {
            self.registry.notify_one(session, message).await
        }
    }

    const WAIT: Duration = Duration::from_secs(30);

    struct Harness {
        connector: Arc<MemoryConnector>,
        link: Arc<UpstreamLink>,
        registry: Arc<SessionRegistry>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(plans: Vec<Plan>) -> Harness {
        let connector = MemoryConnector::with_plans(plans);
        let settings = LinkSettings {
            endpoint: "mem://lock".into(),
            connect_timeout: Duration::from_secs(3),
            receive_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_secs(3),
        };
        let link = Arc::new(UpstreamLink::new(
            settings.endpoint.clone(),
            settings.connect_timeout,
            connector.clone(),
        ));
        let registry = Arc::new(SessionRegistry::default());
        let cancel = CancellationToken::new();
        let task = ReconnectSupervisor::new(Arc::clone(&link), registry.clone(), &settings)
            .spawn(cancel.clone());
        Harness { connector, link, registry, cancel, task }
    }

    async fn next_payload(session: &mut SessionHandle) -> String {
        timeout(WAIT, session.outbox.recv())
            .await
            .expect("timed out waiting for a relayed message")
            .expect("session outbox closed")
            .payload
    }

    async fn wait_for(link: &UpstreamLink, state: LinkState) {
        let mut rx = link.subscribe_state();
        timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for link state")
            .expect("link dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_broadcasts_status() {
        let h = start(vec![Plan::Accept]);
        let mut session = h.registry.join().await;

        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
        assert_eq!(h.link.state(), LinkState::Connected);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_k_failures_within_k_intervals() {
        let h = start(vec![Plan::Refuse, Plan::Refuse, Plan::Accept]);
        let started = Instant::now();

        wait_for(&h.link, LinkState::Connected).await;

        let elapsed = started.elapsed();
        assert_eq!(h.connector.attempts(), 3);
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(6_500), "elapsed {elapsed:?}");

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn relays_upstream_messages_in_order() {
        let h = start(vec![Plan::Accept]);
        let mut session = h.registry.join().await;
        wait_for(&h.link, LinkState::Connected).await;
        let peer = h.connector.take_peer().unwrap();

        for payload in ["DOOR_OPENED", "DOOR_CLOSED", "LOCKED"] {
            peer.outbox.send(Ok(payload.into())).unwrap();
        }

        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
        assert_eq!(next_payload(&mut session).await, "DOOR_OPENED");
        assert_eq!(next_payload(&mut session).await, "DOOR_CLOSED");
        assert_eq!(next_payload(&mut session).await, "LOCKED");

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_broadcasts_and_reconnects() {
        let h = start(vec![Plan::Accept, Plan::Accept]);
        let mut session = h.registry.join().await;
        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);

        drop(h.connector.take_peer());

        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
        assert_eq!(h.connector.attempts(), 2);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_is_noticed_by_listener() {
        let h = start(vec![Plan::Accept]);
        let mut session = h.registry.join().await;
        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
        let _peer = h.connector.take_peer().unwrap();
        h.connector.break_writes.store(true, Ordering::SeqCst);

        assert!(h.link.send("UNLOCK").await.is_err());

        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_loop_and_disconnects() {
        let h = start(vec![Plan::Accept]);
        wait_for(&h.link, LinkState::Connected).await;
        let peer = h.connector.take_peer().unwrap();

        h.cancel.cancel();
        timeout(WAIT, h.task).await.unwrap().unwrap();

        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert!(peer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn session_joining_mid_transition_gets_status_once() {
        let connector = MemoryConnector::with_plans([Plan::Accept]);
        let settings = LinkSettings::new("mem://lock");
        let link = Arc::new(UpstreamLink::new(
            settings.endpoint.clone(),
            settings.connect_timeout,
            connector.clone(),
        ));
        let broadcaster = Arc::new(JoinDuringTransition {
            registry: Arc::new(SessionRegistry::default()),
            joined: Mutex::new(None),
        });
        let cancel = CancellationToken::new();
        let task = ReconnectSupervisor::new(Arc::clone(&link), broadcaster.clone(), &settings)
            .spawn(cancel.clone());

        wait_for(&link, LinkState::Connected).await;
        let mut session = timeout(WAIT, async {
            loop {
                if let Some(session) = broadcaster.joined.lock().await.take() {
                    break session;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("no session joined during the transition");

        assert_eq!(next_payload(&mut session).await, LOCK_DISCONNECTED);
        assert_eq!(next_payload(&mut session).await, LOCK_CONNECTED);
        assert!(session.outbox.try_recv().is_err(), "connected status delivered twice");

        cancel.cancel();
        task.await.unwrap();
    }
}
