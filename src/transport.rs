use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::message::{DirectMethodResponse, InboundEvent, Message};

/// Kinds of inbound event a handler can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Cloud to device messages, or module input messages
    Message,
    /// Direct method invocations
    MethodRequest,
    /// Desired property patches of the device twin
    TwinPatch,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Message => "message",
            EventKind::MethodRequest => "method request",
            EventKind::TwinPatch => "twin patch",
        })
    }
}

/// Live connection to the hub, owned by whoever opened it.
///
/// Holds at most one subscription per [`EventKind`]. `shutdown` must be called once
/// before the handle is dropped.
#[async_trait]
pub trait Transport: Send {
    /// Send a device to cloud message
    async fn send_message(&mut self, message: Message) -> crate::Result<()>;
    /// Send a message to a named output of an edge module
    async fn send_message_to_output(&mut self, message: Message, output: &str)
        -> crate::Result<()>;
    ///
    async fn respond_to_direct_method(&mut self, response: DirectMethodResponse)
        -> crate::Result<()>;
    /// Register the single slot for `kind`
    async fn subscribe(&mut self, kind: EventKind) -> crate::Result<Subscription>;
    /// Free the slot for `kind`, closing its subscription
    async fn unsubscribe(&mut self, kind: EventKind) -> crate::Result<()>;
    /// Close the connection
    async fn shutdown(&mut self) -> crate::Result<()>;
}

/// Opens Transport Handles from a fixed configuration
#[async_trait]
pub trait Connector: Sync {
    ///
    type Transport: Transport;

    ///
    async fn connect(&self) -> crate::Result<Self::Transport>;
}

/// Stream of events of one kind, handed out by [`Transport::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    kind: EventKind,
    receiver: Receiver<InboundEvent>,
}

impl Subscription {
    ///
    pub fn new(kind: EventKind, receiver: Receiver<InboundEvent>) -> Self {
        Self { kind, receiver }
    }

    ///
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Next event, or `None` once the transport stopped delivering
    pub async fn next(&mut self) -> Option<InboundEvent> {
        self.receiver.recv().await
    }
}
