//! Simulators for exercising Azure IoT Hub messaging from a device, an edge module and the
//! service side.
//!
//! Every scenario opens one connection, performs its operation and closes the connection
//! again. Listening scenarios run a [`ListenerSession`]: one connection, one handler for one
//! kind of event, running until a stop signal resolves.
//!
//! ## Feature flags
//!
//! - `with-http` (default): HTTPS endpoints used by the file upload and by the registry
//!   manager (direct method invocation, device twin updates).
//! - `with-amqp` (default): cloud to device sends of the registry manager.
//!
//! # Examples
//!
//! Answer direct methods until the operator types `q`
//! ```no_run
//! use azure_iot_simulator::{cancel, device, DeviceConnectionString, MqttConnector};
//!
//! #[tokio::main]
//! async fn main() -> azure_iot_simulator::Result<()> {
//!     let connection: DeviceConnectionString =
//!         "HostName=iothubname.azure-devices.net;DeviceId=MyDeviceId;SharedAccessKey=TheAccessKey"
//!             .parse()?;
//!
//!     let summary =
//!         device::listen_for_cloud_method(MqttConnector::new(connection), cancel::operator_quit())
//!             .await?;
//!     println!("answered {} requests", summary.replies_sent);
//!     Ok(())
//! }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms)]

#[macro_use]
extern crate log;

/// Package version, reported to the hub as the client type
pub const SDK_VERSION: &str = std::env!("CARGO_PKG_VERSION");

#[cfg(feature = "with-amqp")]
pub(crate) mod amqp_transport;
/// Stop signals for listener sessions
pub mod cancel;
/// Device side scenarios
pub mod device;
/// Edge module relay
pub mod edge;
/// Errors
pub mod error;
#[cfg(feature = "with-http")]
pub(crate) mod http_transport;
/// The run-until-cancelled listener
pub mod listener;
/// Message types for communicating with the IoT Hub
pub mod message;
pub(crate) mod mqtt_transport;
/// Service side scenarios
pub mod service;
/// Where connection strings come from
pub mod settings;
/// Connection strings and shared access signatures
pub mod token;
/// Transport types
pub mod transport;
/// File upload saga
pub mod upload;

pub use crate::error::IoTHubError;
pub use crate::listener::{ListenerSession, SessionState, SessionSummary};
pub use crate::message::{
    DirectMethodInvocation, DirectMethodResponse, InboundEvent, Message, MessageBuilder,
    MessageStatus, Reply, TwinPatch,
};
pub use crate::mqtt_transport::{MqttConnector, MqttTransport};
pub use crate::settings::SimulatorConfig;
pub use crate::token::{DeviceConnectionString, ServiceConnectionString, TokenError};
pub use crate::transport::{Connector, EventKind, Subscription, Transport};

/// Result of every fallible operation in this crate
pub type Result<T> = std::result::Result<T, IoTHubError>;
