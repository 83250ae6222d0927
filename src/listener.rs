//! Run-until-cancelled event listener over one Transport Handle.
//!
//! A session walks `Idle -> Connecting -> Listening -> ShuttingDown -> Closed`. Events are
//! handled one at a time and the stop signal is only looked at between two events, so a
//! handler that has started (and the reply it asks for) always completes before shutdown.

use std::fmt;
use std::future::Future;

use crate::message::{InboundEvent, Reply};
use crate::transport::{Connector, EventKind, Subscription, Transport};

/// Lifecycle of a [`ListenerSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ///
    Idle,
    ///
    Connecting,
    /// The only state in which handlers run
    Listening,
    ///
    ShuttingDown,
    ///
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Counters reported when a session ends cleanly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Events passed to the handler
    pub events_handled: usize,
    /// Replies sent back on the connection
    pub replies_sent: usize,
}

/// Receives exactly one kind of event until stopped, then releases the connection
#[derive(Debug)]
pub struct ListenerSession<C> {
    connector: C,
    kind: EventKind,
    state: SessionState,
}

impl<C: Connector> ListenerSession<C> {
    ///
    pub fn new(connector: C, kind: EventKind) -> Self {
        Self {
            connector,
            kind,
            state: SessionState::Idle,
        }
    }

    ///
    pub fn state(&self) -> SessionState {
        self.state
    }

    ///
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    fn transition(&mut self, next: SessionState) {
        debug!("{} listener: {} -> {}", self.kind, self.state, next);
        self.state = next;
    }

    /// Connect, pass every event of the session's kind to `handler` until `stop` resolves,
    /// then shut the connection down.
    ///
    /// Shutdown runs exactly once whenever the connection was opened, whichever way the
    /// session ends. There is no reconnect: a lost connection ends the session with
    /// [`IoTHubError::ConnectionClosed`](crate::IoTHubError::ConnectionClosed).
    pub async fn run<H, S>(&mut self, mut handler: H, stop: S) -> crate::Result<SessionSummary>
    where
        H: FnMut(InboundEvent) -> Option<Reply> + Send,
        S: Future<Output = ()> + Send,
    {
        self.transition(SessionState::Connecting);
        info!("IoT Hub device connecting to client...");
        let mut transport = match self.connector.connect().await {
            Ok(transport) => transport,
            Err(e) => {
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };

        let result = match transport.subscribe(self.kind).await {
            Ok(subscription) => {
                self.transition(SessionState::Listening);
                info!("listening for {} events", self.kind);
                listen(&mut transport, subscription, &mut handler, stop).await
            }
            Err(e) => Err(e),
        };

        self.transition(SessionState::ShuttingDown);
        info!("shutting down IoT Hub client...");
        let shutdown = transport.shutdown().await;
        self.transition(SessionState::Closed);

        match (result, shutdown) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(shutdown_error)) => {
                error!("shutdown after failure also failed: {}", shutdown_error);
                Err(e)
            }
        }
    }
}

async fn listen<T, H, S>(
    transport: &mut T,
    mut subscription: Subscription,
    handler: &mut H,
    stop: S,
) -> crate::Result<SessionSummary>
where
    T: Transport,
    H: FnMut(InboundEvent) -> Option<Reply> + Send,
    S: Future<Output = ()> + Send,
{
    let mut summary = SessionSummary::default();
    tokio::pin!(stop);

    loop {
        let event = tokio::select! {
            biased;
            _ = &mut stop => break,
            event = subscription.next() => event,
        };

        let event = match event {
            Some(event) => event,
            None => return Err(crate::IoTHubError::ConnectionClosed),
        };

        summary.events_handled += 1;
        let reply = match handler(event) {
            Some(reply) => reply,
            None => continue,
        };

        let sent = match reply {
            Reply::MethodResponse(response) => transport.respond_to_direct_method(response).await,
            Reply::Forward { output, message } => {
                transport.send_message_to_output(message, &output).await
            }
        };
        match sent {
            Ok(()) => summary.replies_sent += 1,
            Err(e) => error!("could not send reply: {}", e),
        }
    }

    Ok(summary)
}
