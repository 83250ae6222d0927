//! Simulator configuration: which identities to connect as.

use std::path::Path;

use config::{Config, ConfigError, Environment, File, Source};
use serde::Deserialize;

use crate::error::IoTHubError;
use crate::token::{DeviceConnectionString, ServiceConnectionString};

/// Prefix of the environment variables read into [`SimulatorConfig`]
pub const ENV_PREFIX: &str = "IOT_SIMULATOR";

/// File name (without extension) looked up in the working directory by default
pub const DEFAULT_CONFIG_NAME: &str = "simulator";

/// Connection strings of the identities the scenarios use
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// Device identity for device side scenarios
    pub device_connection_string: Option<String>,
    /// Shared access policy for service side scenarios
    pub service_connection_string: Option<String>,
    /// Module identity for the edge relay
    pub module_connection_string: Option<String>,
}

impl SimulatorConfig {
    /// Load from a config file and `IOT_SIMULATOR_*` environment variables.
    ///
    /// Without `path` a `simulator.{toml,json,yaml,..}` file is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        Self::from_sources(file, Environment::with_prefix(ENV_PREFIX))
    }

    fn from_sources<S>(file: S, environment: Environment) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?
            .try_deserialize()
    }

    /// Replace values with the ones given on the command line
    pub fn with_overrides(
        mut self,
        device: Option<String>,
        service: Option<String>,
        module: Option<String>,
    ) -> Self {
        if device.is_some() {
            self.device_connection_string = device;
        }
        if service.is_some() {
            self.service_connection_string = service;
        }
        if module.is_some() {
            self.module_connection_string = module;
        }
        self
    }

    ///
    pub fn device(&self) -> crate::Result<DeviceConnectionString> {
        let connection_string = self
            .device_connection_string
            .as_deref()
            .ok_or(IoTHubError::MissingConfiguration("device connection string"))?;
        Ok(connection_string.parse()?)
    }

    ///
    pub fn service(&self) -> crate::Result<ServiceConnectionString> {
        let connection_string = self
            .service_connection_string
            .as_deref()
            .ok_or(IoTHubError::MissingConfiguration("service connection string"))?;
        Ok(connection_string.parse()?)
    }

    /// Module identity; must carry a `ModuleId`
    pub fn module(&self) -> crate::Result<DeviceConnectionString> {
        let connection_string = self
            .module_connection_string
            .as_deref()
            .ok_or(IoTHubError::MissingConfiguration("module connection string"))?;
        let connection: DeviceConnectionString = connection_string.parse()?;
        if connection.module_id.is_none() {
            return Err(IoTHubError::MissingConfiguration(
                "ModuleId in the module connection string",
            ));
        }
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::collections::HashMap;

    const DEVICE: &str = "HostName=hub.azure-devices.net;DeviceId=dev;SharedAccessKey=a2V5";

    fn environment(vars: &[(&str, &str)]) -> Environment {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(vars))
    }

    #[test]
    fn environment_overrides_file() {
        let file = File::from_str(
            r#"
            device_connection_string = "HostName=file;DeviceId=dev;SharedAccessKey=a2V5"
            service_connection_string = "HostName=hub;SharedAccessKeyName=owner;SharedAccessKey=a2V5"
            "#,
            FileFormat::Toml,
        );
        let config = SimulatorConfig::from_sources(
            file,
            environment(&[("IOT_SIMULATOR_DEVICE_CONNECTION_STRING", DEVICE)]),
        )
        .unwrap();

        assert_eq!(config.device_connection_string.as_deref(), Some(DEVICE));
        assert_eq!(config.service().unwrap().shared_access_key_name, "owner");
        assert_eq!(config.module_connection_string, None);
    }

    #[test]
    fn empty_sources_give_empty_config() {
        let config = SimulatorConfig::from_sources(
            File::from_str("", FileFormat::Toml),
            environment(&[]),
        )
        .unwrap();
        assert_eq!(config, SimulatorConfig::default());
        assert!(matches!(
            config.device(),
            Err(IoTHubError::MissingConfiguration("device connection string"))
        ));
    }

    #[test]
    fn command_line_wins() {
        let config = SimulatorConfig {
            device_connection_string: Some("from file".to_string()),
            ..Default::default()
        }
        .with_overrides(Some(DEVICE.to_string()), None, None);

        assert_eq!(config.device().unwrap().device_id, "dev");
        assert_eq!(config.service_connection_string, None);
    }

    #[test]
    fn module_identity_needs_module_id() {
        let config = SimulatorConfig {
            module_connection_string: Some(DEVICE.to_string()),
            ..Default::default()
        };
        assert!(matches!(config.module(), Err(IoTHubError::MissingConfiguration(_))));

        let config = SimulatorConfig {
            module_connection_string: Some(format!("{};ModuleId=relay", DEVICE)),
            ..Default::default()
        };
        assert_eq!(config.module().unwrap().client_id(), "dev/relay");
    }
}
