//! Service side cloud to device sends.
//!
//! The hub only accepts these over AMQP: the sender authorises the connection with a CBS
//! put-token carrying the policy SAS, then transfers to `/messages/devicebound` with the
//! target device in the `to` property.

use std::fmt;

use chrono::{Duration, Utc};
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::types::messaging::{
    ApplicationProperties, Data, Message as AmqpMessage, MessageId, Outcome, Properties,
};
use fe2o3_amqp::types::primitives::{Binary, SimpleValue, Timestamp};
use fe2o3_amqp::{Connection, Sender, Session};
use fe2o3_amqp_cbs::client::CbsClient;
use fe2o3_amqp_cbs::token::CbsToken;

use crate::error::IoTHubError;
use crate::message::Message;
use crate::mqtt_transport::tls_connect;
use crate::token::{ServiceConnectionString, SharedAccessPolicyTokenSource, TokenSource};

const AMQPS_PORT: u16 = 5671;
const DEVICEBOUND_ADDRESS: &str = "/messages/devicebound";
const SAS_TOKEN_TYPE: &str = "servicebus.windows.net:sastoken";

fn amqp_error<E: fmt::Display>(e: E) -> IoTHubError {
    IoTHubError::AmqpError(e.to_string())
}

fn devicebound_address(device_id: &str) -> String {
    format!("/devices/{}/messages/devicebound", device_id)
}

/// AMQP message addressed to `device_id`. Application properties are carried as
/// strings and a message id is generated when `message` has none.
pub(crate) fn devicebound_message(device_id: &str, message: &Message) -> AmqpMessage<Data> {
    let message_id = message
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut properties = Properties::builder()
        .message_id(MessageId::String(message_id))
        .to(devicebound_address(device_id));
    if let Some(content_type) = message.content_type() {
        properties = properties.content_type(content_type.to_string());
    }
    if let Some(content_encoding) = message.content_encoding() {
        properties = properties.content_encoding(content_encoding.to_string());
    }

    let mut application_properties = ApplicationProperties::builder();
    for (key, value) in message.properties() {
        application_properties =
            application_properties.insert(key.clone(), SimpleValue::String(value.clone()));
    }

    AmqpMessage::builder()
        .properties(properties.build())
        .application_properties(application_properties.build())
        .data(Binary::from(message.body.clone()))
        .build()
}

/// Sends cloud to device messages with a hub shared access policy
#[derive(Debug, Clone)]
pub struct AmqpDeviceboundSender {
    host_name: String,
    token_source: SharedAccessPolicyTokenSource,
}

impl AmqpDeviceboundSender {
    ///
    pub fn new(connection: &ServiceConnectionString) -> Self {
        Self {
            host_name: connection.host_name.clone(),
            token_source: connection.token_source(),
        }
    }

    /// Open a connection, send `message` to `device_id` and close the connection again
    pub async fn send(&self, device_id: &str, message: &Message) -> crate::Result<()> {
        let expiry = Utc::now() + Duration::hours(1);
        let token = self.token_source.get(&expiry)?;

        let stream = tls_connect(&self.host_name, AMQPS_PORT).await?;
        let mut connection = Connection::builder()
            .container_id(format!("azure-iot-simulator-{}", uuid::Uuid::new_v4()))
            .hostname(self.host_name.as_str())
            .sasl_profile(SaslProfile::Anonymous)
            .open_with_stream(stream)
            .await
            .map_err(amqp_error)?;
        debug!("AMQP connection to {} open", self.host_name);

        let sent = async {
            let mut session = Session::begin(&mut connection).await.map_err(amqp_error)?;

            let mut cbs = CbsClient::attach(&mut session).await.map_err(amqp_error)?;
            let cbs_token = CbsToken::new(
                token,
                SAS_TOKEN_TYPE,
                Some(Timestamp::from_milliseconds(expiry.timestamp_millis())),
            );
            cbs.put_token(self.host_name.clone(), cbs_token)
                .await
                .map_err(amqp_error)?;
            cbs.close().await.map_err(amqp_error)?;
            trace!("CBS token accepted for {}", self.host_name);

            let mut sender = Sender::attach(&mut session, "devicebound-sender", DEVICEBOUND_ADDRESS)
                .await
                .map_err(amqp_error)?;
            let outcome = sender
                .send(devicebound_message(device_id, message))
                .await
                .map_err(amqp_error)?;
            sender.close().await.map_err(amqp_error)?;
            session.end().await.map_err(amqp_error)?;

            match outcome {
                Outcome::Accepted(_) => Ok(()),
                other => Err(IoTHubError::AmqpError(format!(
                    "message to {} was not accepted: {:?}",
                    device_id, other
                ))),
            }
        }
        .await;

        let closed = connection.close().await.map_err(amqp_error);
        sent?;
        closed
    }
}
