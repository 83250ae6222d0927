//! Device side scenarios: device to cloud messages and listeners for what the cloud sends
//! down.

use std::future::Future;

use serde_json::json;

use crate::listener::{ListenerSession, SessionSummary};
use crate::message::{
    status_message, DirectMethodInvocation, DirectMethodResponse, InboundEvent, Message,
    MessageStatus, Reply, TwinPatch,
};
use crate::transport::{Connector, EventKind, Transport};

/// The one method the simulated device knows
pub const KNOWN_METHOD: &str = "method1";

/// Send one status message from the device to the hub.
///
/// `status` is validated before any connection is opened.
pub async fn send_status_message<C: Connector>(connector: &C, status: &str) -> crate::Result<()> {
    let status: MessageStatus = status.parse()?;
    let message = status_message(status)?;

    info!("IoT Hub device connecting to client...");
    let mut transport = connector.connect().await?;

    info!("sending the message: {}", message.body_text());
    let sent = transport.send_message(message).await;
    let shutdown = transport.shutdown().await;
    sent?;
    shutdown?;

    info!("delivery successful!");
    Ok(())
}

/// Log a cloud to device message
pub fn log_message(message: &Message) {
    info!("message received:\t{}", message.body_text());
    info!("custom properties:\t{:?}", message.properties());
    info!("content type:\t{}", message.content_type().unwrap_or("<none>"));
}

/// Answer a direct method: `method1` succeeds, anything else is a bad request
pub fn dispatch_method(invocation: &DirectMethodInvocation) -> DirectMethodResponse {
    if invocation.method_name == KNOWN_METHOD {
        info!("executed {}", KNOWN_METHOD);
        DirectMethodResponse::for_invocation(
            invocation,
            200,
            &json!({"result": true, "data": "some data"}),
        )
    } else {
        error!("executed unknown method: {}", invocation.method_name);
        DirectMethodResponse::for_invocation(
            invocation,
            400,
            &json!({"result": false, "data": "unknown method"}),
        )
    }
}

///
pub fn log_patch(patch: &TwinPatch) {
    info!(
        "data patch: {} (version {})",
        serde_json::Value::Object(patch.properties.clone()),
        patch.version.map_or_else(|| "unknown".to_string(), |v| v.to_string())
    );
}

/// Event handler for [`listen_for_cloud_msg`]
pub fn handle_cloud_message(event: InboundEvent) -> Option<Reply> {
    match event {
        InboundEvent::Message(message) => log_message(&message),
        other => warn!("unexpected {} event", other.kind()),
    }
    None
}

/// Event handler for [`listen_for_cloud_method`]
pub fn handle_method_request(event: InboundEvent) -> Option<Reply> {
    match event {
        InboundEvent::MethodRequest(invocation) => {
            Some(Reply::MethodResponse(dispatch_method(&invocation)))
        }
        other => {
            warn!("unexpected {} event", other.kind());
            None
        }
    }
}

/// Event handler for [`listen_for_patch`]
pub fn handle_twin_patch(event: InboundEvent) -> Option<Reply> {
    match event {
        InboundEvent::TwinPatch(patch) => log_patch(&patch),
        other => warn!("unexpected {} event", other.kind()),
    }
    None
}

/// Log cloud to device messages until `stop` resolves
pub async fn listen_for_cloud_msg<C, S>(connector: C, stop: S) -> crate::Result<SessionSummary>
where
    C: Connector,
    S: Future<Output = ()> + Send,
{
    ListenerSession::new(connector, EventKind::Message)
        .run(handle_cloud_message, stop)
        .await
}

/// Answer direct methods until `stop` resolves
pub async fn listen_for_cloud_method<C, S>(connector: C, stop: S) -> crate::Result<SessionSummary>
where
    C: Connector,
    S: Future<Output = ()> + Send,
{
    ListenerSession::new(connector, EventKind::MethodRequest)
        .run(handle_method_request, stop)
        .await
}

/// Log desired property patches until `stop` resolves
pub async fn listen_for_patch<C, S>(connector: C, stop: S) -> crate::Result<SessionSummary>
where
    C: Connector,
    S: Future<Output = ()> + Send,
{
    ListenerSession::new(connector, EventKind::TwinPatch)
        .run(handle_twin_patch, stop)
        .await
}
