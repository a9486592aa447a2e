//! [`CommandRelay`] – browser → lock controller command path.
//!
//! Fire-and-fail-fast: a command is written to the link if it is up, and the
//! outcome is reported to the issuing session only.  Nothing here waits for
//! a reconnect or touches the supervisor.

use std::sync::Arc;

use lockgate_types::{RelayMessage, SessionId, command_ack};
use tracing::{info, warn};

use crate::link::UpstreamLink;
use crate::registry::RelayBroadcaster;

#[derive(Clone)]
pub struct CommandRelay {
    link: Arc<UpstreamLink>,
    broadcaster: Arc<dyn RelayBroadcaster>,
}

impl CommandRelay {
    pub fn new(link: Arc<UpstreamLink>, broadcaster: Arc<dyn RelayBroadcaster>) -> Self {
        Self { link, broadcaster }
    }

    /// Forward `payload` upstream and reply to `session` with the outcome.
    ///
    /// Returns the reply text that was delivered.
    pub async fn handle_command(&self, session: SessionId, payload: &str) -> String {
        info!(session = %session, payload, "Received command");

        let reply = match self.link.send(payload).await {
            Ok(()) => command_ack(payload),
            Err(e) => {
                warn!(session = %session, error = %e, "command not delivered to Door Lock");
                e.reply_text().to_string()
            }
        };

        self.broadcaster
            .notify_one(session, RelayMessage::downstream(reply.clone()))
            .await;
        reply
    }
}
