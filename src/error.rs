use thiserror::Error;

use crate::token::TokenError;
use crate::transport::EventKind;

/// Errors raised while talking to the IoT Hub or preparing a request for it
#[derive(Debug, Error)]
pub enum IoTHubError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("tls error: {0}")]
    TlsError(#[from] native_tls::Error),
    #[error("malformed mqtt packet: {0}")]
    PacketError(#[from] mqtt::packet::VariablePacketError),
    #[error("could not encode mqtt packet: {0}")]
    EncodeError(String),
    #[error("invalid mqtt topic: {0}")]
    TopicError(String),
    #[error("connection refused by the hub: {0}")]
    ConnectionRefused(String),
    #[error("connection to the hub was closed")]
    ConnectionClosed,
    #[cfg(feature = "with-http")]
    #[error("http error: {0}")]
    HttpError(#[from] hyper::Error),
    #[cfg(feature = "with-http")]
    #[error("invalid http request: {0}")]
    HttpRequestError(#[from] hyper::http::Error),
    #[error("amqp error: {0}")]
    AmqpError(String),
    #[error("service responded with status {status}: {body}")]
    ServiceResponse { status: u16, body: String },
    #[error("invalid json: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error(transparent)]
    TokenError(#[from] TokenError),
    #[error("configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),
    #[error("no {0} configured")]
    MissingConfiguration(&'static str),
    #[error("{0} is not an acceptable status, please use error or success")]
    InvalidStatus(String),
    #[error("device with id ({0}) was not found")]
    DeviceNotFound(String),
    #[error("a {0} handler is already registered on this connection")]
    AlreadySubscribed(EventKind),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("storage blob upload error ({status}): {description}")]
    UploadFailed { status: i32, description: String },
    #[error("{0}")]
    Other(String),
}

impl IoTHubError {
    /// Log a failed scenario: one `error!` line, with the full error at debug level.
    ///
    /// Input the operator got wrong is reported as is, anything else as an error from the
    /// hub.
    pub fn report(&self) {
        debug!("{:?}", self);
        match self {
            IoTHubError::InvalidStatus(_) | IoTHubError::MissingConfiguration(_) => {
                error!("{}", self)
            }
            _ => error!("unexpected error from IoT Hub: {}", self),
        }
    }
}
