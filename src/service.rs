//! Service side scenarios, acting on devices through the hub's registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::IoTHubError;
use crate::message::{status_body, Message, MessageStatus};

/// Seconds the hub waits for the device to connect, and then to answer
const METHOD_TIMEOUT_SECS: u64 = 30;

/// Direct method call made by the service
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudToDeviceMethod {
    ///
    pub method_name: String,
    ///
    pub payload: Value,
    ///
    pub response_timeout_in_seconds: u64,
    ///
    pub connect_timeout_in_seconds: u64,
}

impl CloudToDeviceMethod {
    ///
    pub fn new(method_name: &str, payload: Value) -> Self {
        Self {
            method_name: method_name.to_string(),
            payload,
            response_timeout_in_seconds: METHOD_TIMEOUT_SECS,
            connect_timeout_in_seconds: METHOD_TIMEOUT_SECS,
        }
    }
}

/// What the device answered to a direct method
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CloudToDeviceMethodResult {
    ///
    pub status: i32,
    ///
    #[serde(default)]
    pub payload: Value,
}

///
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TwinProperties {
    ///
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub desired: Map<String, Value>,
    ///
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub reported: Map<String, Value>,
}

/// Device twin document, also used as the patch sent to update one
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Twin {
    ///
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Concurrency token of the twin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    ///
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tags: Map<String, Value>,
    ///
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<TwinProperties>,
}

/// Service operations on device identities
#[async_trait]
pub trait RegistryManager: Send {
    ///
    async fn send_c2d_message(&mut self, device_id: &str, message: Message) -> crate::Result<()>;
    ///
    async fn invoke_device_method(
        &mut self,
        device_id: &str,
        method: &CloudToDeviceMethod,
    ) -> crate::Result<CloudToDeviceMethodResult>;
    /// The device twin, `None` when the device does not exist
    async fn get_twin(&mut self, device_id: &str) -> crate::Result<Option<Twin>>;
    /// Apply `patch` if the twin still has `etag`
    async fn update_twin(&mut self, device_id: &str, patch: &Twin, etag: &str)
        -> crate::Result<Twin>;
}

/// Send one status message from the hub to a device.
///
/// `status` is validated before the registry is used.
pub async fn send_c2d_status_message<R>(
    registry: &mut R,
    device_id: &str,
    status: &str,
) -> crate::Result<()>
where
    R: RegistryManager + ?Sized,
{
    let status: MessageStatus = status.parse()?;
    let message = Message::builder()
        .set_body(status_body(status)?)
        .set_content_type("application/json".to_owned())
        .build();

    info!("sending message...");
    registry.send_c2d_message(device_id, message).await
}

/// Invoke `method_name` on a device with a sample payload
pub async fn invoke_method<R>(
    registry: &mut R,
    device_id: &str,
    method_name: &str,
) -> crate::Result<CloudToDeviceMethodResult>
where
    R: RegistryManager + ?Sized,
{
    let method = CloudToDeviceMethod::new(method_name, json!({"sample": "data"}));
    let result = registry.invoke_device_method(device_id, &method).await?;
    info!(
        "device {} answered {} with status {}: {}",
        device_id, method_name, result.status, result.payload
    );
    Ok(result)
}

/// Desired frame rate and location tags applied by [`patch_device_twin`]
pub fn sample_twin_patch() -> Twin {
    let mut desired = Map::new();
    desired.insert("FPS".to_string(), json!(60));

    let mut tags = Map::new();
    tags.insert(
        "location".to_string(),
        json!({"country": "United States", "city": "Houston", "state": "Texas"}),
    );

    Twin {
        tags,
        properties: Some(TwinProperties {
            desired,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Update a device's tags and desired properties, conditional on its current etag
pub async fn patch_device_twin<R>(registry: &mut R, device_id: &str) -> crate::Result<Twin>
where
    R: RegistryManager + ?Sized,
{
    let twin = registry
        .get_twin(device_id)
        .await?
        .ok_or_else(|| IoTHubError::DeviceNotFound(device_id.to_string()))?;
    let etag = twin.etag.as_deref().unwrap_or("*");

    let updated = registry
        .update_twin(device_id, &sample_twin_patch(), etag)
        .await?;
    info!("device patched successfully!");
    Ok(updated)
}

#[cfg(feature = "with-http")]
pub use self::http::HttpRegistryManager;

#[cfg(feature = "with-http")]
mod http {
    use async_trait::async_trait;
    use hyper::header::{self, HeaderName};
    use hyper::{Body, Method, StatusCode};

    use super::{CloudToDeviceMethod, CloudToDeviceMethodResult, RegistryManager, Twin};
    #[cfg(feature = "with-amqp")]
    use crate::amqp_transport::AmqpDeviceboundSender;
    #[cfg(not(feature = "with-amqp"))]
    use crate::error::IoTHubError;
    use crate::http_transport::{authorization, ensure_success, HttpTransport, API_VERSION};
    use crate::message::Message;
    use crate::token::{url_encode, ServiceConnectionString, SharedAccessPolicyTokenSource};

    /// Registry manager over the hub's HTTPS service api. Cloud to device messages go
    /// over AMQP.
    #[derive(Debug, Clone)]
    pub struct HttpRegistryManager {
        host_name: String,
        token_source: SharedAccessPolicyTokenSource,
        http: HttpTransport,
        #[cfg(feature = "with-amqp")]
        devicebound: AmqpDeviceboundSender,
    }

    impl HttpRegistryManager {
        ///
        pub fn new(connection: &ServiceConnectionString) -> Self {
            Self {
                host_name: connection.host_name.clone(),
                token_source: connection.token_source(),
                http: HttpTransport::new(),
                #[cfg(feature = "with-amqp")]
                devicebound: AmqpDeviceboundSender::new(connection),
            }
        }

        fn twin_url(&self, device_id: &str, suffix: &str) -> String {
            format!(
                "https://{}/twins/{}{}?api-version={}",
                self.host_name,
                url_encode(device_id),
                suffix,
                API_VERSION
            )
        }
    }

    fn if_match(etag: &str) -> String {
        if etag == "*" || etag.starts_with('"') {
            etag.to_string()
        } else {
            format!("\"{}\"", etag)
        }
    }

    #[async_trait]
    impl RegistryManager for HttpRegistryManager {
        #[cfg(feature = "with-amqp")]
        async fn send_c2d_message(
            &mut self,
            device_id: &str,
            message: Message,
        ) -> crate::Result<()> {
            self.devicebound.send(device_id, &message).await
        }

        #[cfg(not(feature = "with-amqp"))]
        async fn send_c2d_message(
            &mut self,
            _device_id: &str,
            _message: Message,
        ) -> crate::Result<()> {
            // The hub only accepts service side cloud to device sends over AMQP
            Err(IoTHubError::Unsupported("sending cloud to device messages without with-amqp"))
        }

        async fn invoke_device_method(
            &mut self,
            device_id: &str,
            method: &CloudToDeviceMethod,
        ) -> crate::Result<CloudToDeviceMethodResult> {
            let body = self
                .http
                .send_json(
                    Method::POST,
                    &self.twin_url(device_id, "/methods"),
                    authorization(&self.token_source)?,
                    vec![],
                    Some(method),
                )
                .await?;
            Ok(serde_json::from_slice(&body)?)
        }

        async fn get_twin(&mut self, device_id: &str) -> crate::Result<Option<Twin>> {
            let headers: Vec<(HeaderName, String)> =
                vec![(header::AUTHORIZATION, authorization(&self.token_source)?)];
            let (status, body) = self
                .http
                .request(Method::GET, &self.twin_url(device_id, ""), headers, Body::empty())
                .await?;
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            ensure_success(status, &body)?;
            Ok(Some(serde_json::from_slice(&body)?))
        }

        async fn update_twin(
            &mut self,
            device_id: &str,
            patch: &Twin,
            etag: &str,
        ) -> crate::Result<Twin> {
            let body = self
                .http
                .send_json(
                    Method::PATCH,
                    &self.twin_url(device_id, ""),
                    authorization(&self.token_source)?,
                    vec![(header::IF_MATCH, if_match(etag))],
                    Some(patch),
                )
                .await?;
            Ok(serde_json::from_slice(&body)?)
        }
    }

}
