use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::IoTHubError;
use crate::transport::EventKind;

const MESSAGE_ID: &str = "$.mid";
const CONTENT_TYPE: &str = "$.ct";
const CONTENT_ENCODING: &str = "$.ce";
const OUTPUT_NAME: &str = "$.on";

/// Message used in body of communication
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Message {
    /// Raw contents of body of the message
    pub body: Vec<u8>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) system_properties: HashMap<String, String>,
}

impl Message {
    /// Create with contents of body as message bytes
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// Get a builder instance for building up a message
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Application properties, such as the ones used by routing queries
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// System properties keyed by their wire id, e.g. `$.ct`
    pub fn system_properties(&self) -> &HashMap<String, String> {
        &self.system_properties
    }

    ///
    pub fn message_id(&self) -> Option<&str> {
        self.system_properties.get(MESSAGE_ID).map(String::as_str)
    }

    ///
    pub fn content_type(&self) -> Option<&str> {
        self.system_properties.get(CONTENT_TYPE).map(String::as_str)
    }

    ///
    pub fn content_encoding(&self) -> Option<&str> {
        self.system_properties
            .get(CONTENT_ENCODING)
            .map(String::as_str)
    }

    /// Body decoded for display: parsed json when possible, otherwise lossy utf-8
    pub fn body_text(&self) -> String {
        match serde_json::from_slice::<Value>(&self.body) {
            Ok(json) => json.to_string(),
            Err(_) => String::from_utf8_lossy(&self.body).into_owned(),
        }
    }

    /// Mark the message for delivery to a named edge module output
    pub(crate) fn set_output_name(&mut self, output: &str) {
        self.system_properties
            .insert(OUTPUT_NAME.to_owned(), output.to_owned());
    }
}

/// Builder for constructing Message instances
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message: Option<Vec<u8>>,
    properties: HashMap<String, String>,
    system_properties: HashMap<String, String>,
}

impl MessageBuilder {
    /// Set the message body
    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.message = Some(body);
        self
    }

    /// Set the identifier for this message
    pub fn set_message_id(self, message_id: String) -> Self {
        self.set_system_property(MESSAGE_ID, message_id)
    }

    /// Set the content-type for this message, such as `text/plain`.
    /// To allow routing query on the message body, this value should be set to `application/json`
    pub fn set_content_type(self, content_type: String) -> Self {
        self.set_system_property(CONTENT_TYPE, content_type)
    }

    /// Set the content-encoding for this message.
    /// If the content-type is set to `application/json`, allowed values are `UTF-8`, `UTF-16`, `UTF-32`.
    pub fn set_content_encoding(self, content_encoding: String) -> Self {
        self.set_system_property(CONTENT_ENCODING, content_encoding)
    }

    /// System properties that are user settable
    /// https://docs.microsoft.com/azure/iot-hub/iot-hub-devguide-messages-construct#system-properties-of-d2c-iot-hub-messages
    fn set_system_property(mut self, property_name: &str, value: String) -> Self {
        self.system_properties
            .insert(property_name.to_owned(), value);
        self
    }

    /// Add a message property
    pub fn add_message_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Build into a message instance
    pub fn build(self) -> Message {
        Message {
            body: self.message.unwrap_or_default(),
            properties: self.properties,
            system_properties: self.system_properties,
        }
    }
}

/// The only statuses the simulated status messages may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    ///
    Error,
    ///
    Success,
}

impl MessageStatus {
    ///
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Error => "error",
            MessageStatus::Success => "success",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = IoTHubError;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        match status {
            "error" => Ok(MessageStatus::Error),
            "success" => Ok(MessageStatus::Success),
            other => Err(IoTHubError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    status: &'a str,
    message: String,
}

/// Json body `{"status": .., "message": "<status>-based message"}`
pub fn status_body(status: MessageStatus) -> crate::Result<Vec<u8>> {
    let payload = StatusPayload {
        status: status.as_str(),
        message: format!("{}-based message", status),
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Device to cloud status message, tagged so routes can filter on it
pub fn status_message(status: MessageStatus) -> crate::Result<Message> {
    Ok(Message::builder()
        .set_body(status_body(status)?)
        .set_message_id(uuid::Uuid::new_v4().to_string())
        .set_content_encoding("utf-8".to_owned())
        .set_content_type("application/json".to_owned())
        .add_message_property("customFilterProperty".to_owned(), "true".to_owned())
        .build())
}

/// Details about a cloud to device direct method invocation call
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMethodInvocation {
    ///
    pub method_name: String,
    ///
    pub message: Message,
    ///
    pub request_id: String,
}

/// Instance to respond to a direct method invocation
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMethodResponse {
    pub(crate) status: i32,
    pub(crate) request_id: String,
    pub(crate) body: String,
}

impl DirectMethodResponse {
    /// Make a new direct method response
    pub fn new(request_id: String, status: i32, body: Option<String>) -> Self {
        Self {
            status,
            request_id,
            body: body.unwrap_or_default(),
        }
    }

    /// Respond to `invocation` with a json payload
    pub fn for_invocation(
        invocation: &DirectMethodInvocation,
        status: i32,
        payload: &Value,
    ) -> Self {
        Self::new(invocation.request_id.clone(), status, Some(payload.to_string()))
    }

    ///
    pub fn status(&self) -> i32 {
        self.status
    }

    ///
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    ///
    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Changed desired properties pushed by the hub
#[derive(Debug, Clone, PartialEq)]
pub struct TwinPatch {
    /// `$version` of the desired properties after the patch, when the hub sent one
    pub version: Option<i64>,
    ///
    pub properties: Map<String, Value>,
}

impl TwinPatch {
    /// Parse the patch document sent on the desired properties topic
    pub fn from_slice(body: &[u8]) -> crate::Result<Self> {
        let mut properties: Map<String, Value> = serde_json::from_slice(body)?;
        let version = properties.remove("$version").and_then(|v| v.as_i64());
        Ok(Self {
            version,
            properties,
        })
    }
}

/// An event received on a Transport Handle
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Cloud to device message, or an input message for an edge module
    Message(Message),
    /// Cloud sending a direct method invocation
    MethodRequest(DirectMethodInvocation),
    /// Cloud updating desired properties
    TwinPatch(TwinPatch),
}

impl InboundEvent {
    ///
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Message(_) => EventKind::Message,
            InboundEvent::MethodRequest(_) => EventKind::MethodRequest,
            InboundEvent::TwinPatch(_) => EventKind::TwinPatch,
        }
    }
}

/// What a handler asks the session to send back on the same connection
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Answer to the method request being handled
    MethodResponse(DirectMethodResponse),
    /// Relay a message to a named module output
    Forward {
        ///
        output: String,
        ///
        message: Message,
    },
}
