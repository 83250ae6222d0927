//! Edge module that relays every input message to an output.

use std::future::Future;

use crate::device::log_message;
use crate::listener::{ListenerSession, SessionSummary};
use crate::message::{InboundEvent, Reply};
use crate::transport::{Connector, EventKind};

/// Output the relay forwards to unless told otherwise
pub const DEFAULT_OUTPUT: &str = "output1";

/// Handler that logs a module input message and forwards it unchanged to `output`
pub fn relay_to(output: &str) -> impl FnMut(InboundEvent) -> Option<Reply> + Send + '_ {
    move |event| match event {
        InboundEvent::Message(message) => {
            log_message(&message);
            Some(Reply::Forward {
                output: output.to_string(),
                message,
            })
        }
        other => {
            warn!("unexpected {} event", other.kind());
            None
        }
    }
}

/// Relay module input messages to `output` until `stop` resolves
pub async fn relay_messages<C, S>(
    connector: C,
    output: &str,
    stop: S,
) -> crate::Result<SessionSummary>
where
    C: Connector,
    S: Future<Output = ()> + Send,
{
    info!("IoT Hub device connecting to edge client...");
    ListenerSession::new(connector, EventKind::Message)
        .run(relay_to(output), stop)
        .await
}
