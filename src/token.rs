use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use thiserror::Error;

const DEVICEID_KEY: &str = "DeviceId";
const MODULEID_KEY: &str = "ModuleId";
const HOSTNAME_KEY: &str = "HostName";
const GATEWAYHOSTNAME_KEY: &str = "GatewayHostName";
const SHAREDACCESSKEY_KEY: &str = "SharedAccessKey";
const SHAREDACCESSKEYNAME_KEY: &str = "SharedAccessKeyName";

// Matches the characters a url component may carry unescaped
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Failure to read credentials or sign with them
#[derive(Debug, Error)]
pub enum TokenError {
    /// The connection string lacks a component the identity needs
    #[error("connection string is missing required parameter {0}")]
    MissingParameter(&'static str),
    /// The shared access key is not valid base64
    #[error("shared access key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),
    /// The key could not be used to initialise the HMAC
    #[error("shared access key has an invalid length")]
    InvalidKeyLength,
    /// The signature could not be url encoded
    #[error("could not encode signature: {0}")]
    Encoding(#[from] serde_urlencoded::ser::Error),
}

/// Something able to produce a shared access signature valid until `expiry`
pub trait TokenSource {
    ///
    fn get(&self, expiry: &DateTime<Utc>) -> Result<String, TokenError>;
}

/// Signs tokens for a device or module identity with its symmetric key
#[derive(Debug, Clone)]
pub struct DeviceKeyTokenSource {
    resource_uri: String,
    key: String,
}

impl DeviceKeyTokenSource {
    ///
    pub fn new(hub: &str, device_id: &str, key: &str) -> Self {
        DeviceKeyTokenSource {
            resource_uri: format!("{}/devices/{}", hub, device_id),
            key: key.to_string(),
        }
    }

    /// Token source for a module of an edge device
    pub fn for_module(hub: &str, device_id: &str, module_id: &str, key: &str) -> Self {
        DeviceKeyTokenSource {
            resource_uri: format!("{}/devices/{}/modules/{}", hub, device_id, module_id),
            key: key.to_string(),
        }
    }
}

impl TokenSource for DeviceKeyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> Result<String, TokenError> {
        let sas = generate_sas(&self.resource_uri, &self.key, expiry.timestamp(), None)?;
        trace!("Using device key token: {}", sas);
        Ok(sas)
    }
}

/// Signs tokens with a hub level shared access policy, for service operations
#[derive(Debug, Clone)]
pub struct SharedAccessPolicyTokenSource {
    host_name: String,
    policy_name: String,
    key: String,
}

impl SharedAccessPolicyTokenSource {
    ///
    pub fn new(host_name: &str, policy_name: &str, key: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            policy_name: policy_name.to_string(),
            key: key.to_string(),
        }
    }
}

impl TokenSource for SharedAccessPolicyTokenSource {
    fn get(&self, expiry: &DateTime<Utc>) -> Result<String, TokenError> {
        generate_sas(
            &self.host_name,
            &self.key,
            expiry.timestamp(),
            Some(&self.policy_name),
        )
    }
}

/// Percent-encode a value for use as one url component
pub(crate) fn url_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

fn generate_sas(
    resource_uri: &str,
    key: &str,
    expiry_timestamp: i64,
    policy_name: Option<&str>,
) -> Result<String, TokenError> {
    let resource_uri = url_encode(resource_uri);
    let to_sign = format!("{}\n{}", resource_uri, expiry_timestamp);
    let token = generate_token(key, &to_sign)?;

    let mut sas = format!(
        "SharedAccessSignature sr={}&{}&se={}",
        resource_uri, token, expiry_timestamp
    );
    if let Some(policy_name) = policy_name {
        sas.push_str("&skn=");
        sas.push_str(policy_name);
    }
    Ok(sas)
}

pub(crate) fn generate_token(key: &str, message: &str) -> Result<String, TokenError> {
    let key = base64::decode(key)?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(&key).map_err(|_| TokenError::InvalidKeyLength)?;
    mac.update(message.as_bytes());
    let signature = base64::encode(mac.finalize().into_bytes());

    let pairs = &[("sig", signature)];
    Ok(serde_urlencoded::to_string(pairs)?)
}

/// Split a `Key=Value;Key=Value` connection string. Values keep any `=` they contain.
fn components(connection_string: &str) -> impl Iterator<Item = (&str, &str)> {
    connection_string
        .split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Credentials of a device, or of a module when `module_id` is present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConnectionString {
    ///
    pub host_name: String,
    ///
    pub device_id: String,
    ///
    pub module_id: Option<String>,
    /// Edge gateway to connect through instead of the hub itself
    pub gateway_host_name: Option<String>,
    ///
    pub shared_access_key: String,
}

impl DeviceConnectionString {
    /// Host the transport connects to
    pub fn connect_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    /// MQTT client id, `{device}` or `{device}/{module}`
    pub fn client_id(&self) -> String {
        match &self.module_id {
            Some(module_id) => format!("{}/{}", self.device_id, module_id),
            None => self.device_id.clone(),
        }
    }

    ///
    pub fn token_source(&self) -> DeviceKeyTokenSource {
        match &self.module_id {
            Some(module_id) => DeviceKeyTokenSource::for_module(
                &self.host_name,
                &self.device_id,
                module_id,
                &self.shared_access_key,
            ),
            None => DeviceKeyTokenSource::new(
                &self.host_name,
                &self.device_id,
                &self.shared_access_key,
            ),
        }
    }
}

impl FromStr for DeviceConnectionString {
    type Err = TokenError;

    fn from_str(connection_string: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut module_id = None;
        let mut gateway_host_name = None;
        let mut key = None;

        for (k, v) in components(connection_string) {
            match k {
                HOSTNAME_KEY => host_name = Some(v.to_string()),
                DEVICEID_KEY => device_id = Some(v.to_string()),
                MODULEID_KEY => module_id = Some(v.to_string()),
                GATEWAYHOSTNAME_KEY => gateway_host_name = Some(v.to_string()),
                SHAREDACCESSKEY_KEY => key = Some(v.to_string()),
                _ => (), // Ignore extraneous component in the connection string
            }
        }

        Ok(Self {
            host_name: host_name.ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?,
            device_id: device_id.ok_or(TokenError::MissingParameter(DEVICEID_KEY))?,
            module_id,
            gateway_host_name,
            shared_access_key: key.ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?,
        })
    }
}

/// Credentials of a hub shared access policy such as `iothubowner`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnectionString {
    ///
    pub host_name: String,
    ///
    pub shared_access_key_name: String,
    ///
    pub shared_access_key: String,
}

impl ServiceConnectionString {
    ///
    pub fn token_source(&self) -> SharedAccessPolicyTokenSource {
        SharedAccessPolicyTokenSource::new(
            &self.host_name,
            &self.shared_access_key_name,
            &self.shared_access_key,
        )
    }
}

impl FromStr for ServiceConnectionString {
    type Err = TokenError;

    fn from_str(connection_string: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut key_name = None;
        let mut key = None;

        for (k, v) in components(connection_string) {
            match k {
                HOSTNAME_KEY => host_name = Some(v.to_string()),
                SHAREDACCESSKEYNAME_KEY => key_name = Some(v.to_string()),
                SHAREDACCESSKEY_KEY => key = Some(v.to_string()),
                _ => (),
            }
        }

        Ok(Self {
            host_name: host_name.ok_or(TokenError::MissingParameter(HOSTNAME_KEY))?,
            shared_access_key_name: key_name
                .ok_or(TokenError::MissingParameter(SHAREDACCESSKEYNAME_KEY))?,
            shared_access_key: key.ok_or(TokenError::MissingParameter(SHAREDACCESSKEY_KEY))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "O+H9VTcdJP0Tqkl7bh4nVG0OJNrAataMpuWB54D0VEc=";

    #[test]
    fn device_sas() {
        assert_eq!(
            generate_sas(
                "myiothub.azure-devices.net/devices/FirstDevice",
                KEY,
                1_587_123_309,
                None
            )
            .unwrap(),
            "SharedAccessSignature sr=myiothub.azure-devices.net%2Fdevices%2FFirstDevice&sig=vn0%2BgyIUKgaBhEU0ypyOhJ0gPK5fSY1TKdvcJ1HxhnQ%3D&se=1587123309"
        );
    }

    #[test]
    fn module_sas() {
        let source = DeviceKeyTokenSource::for_module(
            "myiothub.azure-devices.net",
            "FirstDevice",
            "relay",
            KEY,
        );
        let expiry = DateTime::<Utc>::from_timestamp(1_587_123_309, 0).unwrap();
        assert_eq!(
            source.get(&expiry).unwrap(),
            "SharedAccessSignature sr=myiothub.azure-devices.net%2Fdevices%2FFirstDevice%2Fmodules%2Frelay&sig=2J5OyUHOVejPZJfNVjPU8khvy97m%2BoT37MWwo5oKYDk%3D&se=1587123309"
        );
    }

    #[test]
    fn policy_sas() {
        let source =
            SharedAccessPolicyTokenSource::new("myiothub.azure-devices.net", "iothubowner", KEY);
        let expiry = DateTime::<Utc>::from_timestamp(1_587_123_309, 0).unwrap();
        assert_eq!(
            source.get(&expiry).unwrap(),
            "SharedAccessSignature sr=myiothub.azure-devices.net&sig=S5CEmadVbXk5FbenAtiA31CZo%2Bd0hmWyM%2BgOF%2FZyue8%3D&se=1587123309&skn=iothubowner"
        );
    }

    #[test]
    fn parses_device_connection_string_with_padded_key() {
        let cs: DeviceConnectionString = format!(
            "HostName=myiothub.azure-devices.net;DeviceId=FirstDevice;SharedAccessKey={}",
            KEY
        )
        .parse()
        .unwrap();

        assert_eq!(cs.host_name, "myiothub.azure-devices.net");
        assert_eq!(cs.device_id, "FirstDevice");
        assert_eq!(cs.shared_access_key, KEY);
        assert_eq!(cs.module_id, None);
        assert_eq!(cs.client_id(), "FirstDevice");
        assert_eq!(cs.connect_host(), "myiothub.azure-devices.net");
    }

    #[test]
    fn parses_module_connection_string() {
        let cs: DeviceConnectionString = format!(
            "HostName=hub.azure-devices.net;DeviceId=edge;ModuleId=relay;SharedAccessKey={};GatewayHostName=gateway.local",
            KEY
        )
        .parse()
        .unwrap();

        assert_eq!(cs.client_id(), "edge/relay");
        assert_eq!(cs.connect_host(), "gateway.local");
    }

    #[test]
    fn device_connection_string_requires_key() {
        let err = "HostName=hub.azure-devices.net;DeviceId=dev"
            .parse::<DeviceConnectionString>()
            .unwrap_err();
        assert!(matches!(err, TokenError::MissingParameter(SHAREDACCESSKEY_KEY)));
    }

    #[test]
    fn parses_service_connection_string() {
        let cs: ServiceConnectionString = format!(
            "HostName=hub.azure-devices.net;SharedAccessKeyName=iothubowner;SharedAccessKey={}",
            KEY
        )
        .parse()
        .unwrap();
        assert_eq!(cs.shared_access_key_name, "iothubowner");
        assert_eq!(cs.shared_access_key, KEY);
    }

    #[test]
    fn rejects_key_that_is_not_base64() {
        assert!(matches!(
            generate_token("not base64!", "message"),
            Err(TokenError::InvalidKey(_))
        ));
    }
}
