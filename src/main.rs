use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info};

use azure_iot_simulator::service::{self, HttpRegistryManager};
use azure_iot_simulator::upload::{self, HttpBlobStorage, HttpFileUpload};
use azure_iot_simulator::{cancel, device, edge, MessageStatus, MqttConnector, SimulatorConfig};

#[derive(Parser)]
#[command(version, about = "Simulate IoT Hub device, edge module and service scenarios")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
    /// Config file with the connection strings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Device connection string, overrides the config file.
    #[arg(
        long,
        global = true,
        env = "IOT_SIMULATOR_DEVICE_CONNECTION_STRING",
        hide_env_values = true
    )]
    device_connection_string: Option<String>,
    /// Service (shared access policy) connection string, overrides the config file.
    #[arg(
        long,
        global = true,
        env = "IOT_SIMULATOR_SERVICE_CONNECTION_STRING",
        hide_env_values = true
    )]
    service_connection_string: Option<String>,
    /// Edge module connection string, overrides the config file.
    #[arg(
        long,
        global = true,
        env = "IOT_SIMULATOR_MODULE_CONNECTION_STRING",
        hide_env_values = true
    )]
    module_connection_string: Option<String>,
    /// Trace level logging.
    #[arg(long, default_value_t = false, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate an IoT D2C message.
    #[command(name = "device_to_cloud_msg")]
    DeviceToCloudMsg {
        /// error or success
        #[arg(long)]
        status: String,
    },
    /// Simulate an IoT D2C file upload.
    #[command(name = "file_to_cloud")]
    FileToCloud {
        /// File to upload, a greeting is uploaded when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Simulate an IoT C2D method.
    #[command(name = "cloud_to_device_method")]
    CloudToDeviceMethod {
        /// method1
        #[arg(long = "method_name")]
        method_name: String,
        /// azure id/name for device
        #[arg(long = "device_id")]
        device_id: String,
    },
    /// Simulate an IoT C2D message.
    #[command(name = "cloud_to_device_msg")]
    CloudToDeviceMsg {
        /// error or success
        #[arg(long)]
        status: String,
        /// azure id/name for device
        #[arg(long = "device_id")]
        device_id: String,
    },
    /// Simulate a device listener for an IoT C2D method.
    #[command(name = "listen_for_cloud_method")]
    ListenForCloudMethod,
    /// Simulate a device listener for an IoT C2D message.
    #[command(name = "listen_for_cloud_msg")]
    ListenForCloudMsg,
    /// Simulate patching a device twin.
    #[command(name = "patch_device_twin")]
    PatchDeviceTwin {
        /// azure id/name for device
        #[arg(long = "device_id")]
        device_id: String,
    },
    /// Simulate a device listener for device twin patches.
    #[command(name = "listen_for_patch")]
    ListenForPatch,
    /// Simulate an edge module relaying its input messages to an output.
    #[command(name = "listen_for_module_msg")]
    ListenForModuleMsg {
        /// Module output the messages are forwarded to.
        #[arg(long, default_value = edge::DEFAULT_OUTPUT)]
        output: String,
    },
}

async fn run(cmd: Commands, config: SimulatorConfig) -> azure_iot_simulator::Result<()> {
    match cmd {
        Commands::DeviceToCloudMsg { status } => {
            info!("device_to_cloud_msg triggered with status: {}", status);
            status.parse::<MessageStatus>()?;
            let connector = MqttConnector::new(config.device()?);
            device::send_status_message(&connector, &status).await
        }
        Commands::FileToCloud { file } => {
            info!("file_to_cloud triggered");
            let content = match file {
                Some(path) => tokio::fs::read(path).await?,
                None => upload::DEFAULT_CONTENT.to_vec(),
            };
            let mut uploader = HttpFileUpload::new(&config.device()?);
            upload::upload_file(
                &mut uploader,
                &HttpBlobStorage::new(),
                &upload::default_blob_name(),
                content,
            )
            .await
            .map(|_| ())
        }
        Commands::CloudToDeviceMethod {
            method_name,
            device_id,
        } => {
            info!("cloud_to_device_method triggered for method: {}", method_name);
            info!("IoT Hub registry manager connecting to client...");
            let mut registry = HttpRegistryManager::new(&config.service()?);
            service::invoke_method(&mut registry, &device_id, &method_name)
                .await
                .map(|_| ())
        }
        Commands::CloudToDeviceMsg { status, device_id } => {
            info!("cloud_to_device_msg triggered with status: {}", status);
            // Validate before a registry is created
            status.parse::<MessageStatus>()?;
            info!("IoT Hub registry manager connecting to client...");
            let mut registry = HttpRegistryManager::new(&config.service()?);
            service::send_c2d_status_message(&mut registry, &device_id, &status).await
        }
        Commands::ListenForCloudMethod => {
            info!("listen_for_cloud_method triggered");
            let connector = MqttConnector::new(config.device()?);
            device::listen_for_cloud_method(connector, cancel::operator_quit())
                .await
                .map(|summary| info!("answered {} method requests", summary.replies_sent))
        }
        Commands::ListenForCloudMsg => {
            info!("listen_for_cloud_msg triggered");
            let connector = MqttConnector::new(config.device()?);
            device::listen_for_cloud_msg(connector, cancel::operator_quit())
                .await
                .map(|summary| info!("received {} messages", summary.events_handled))
        }
        Commands::PatchDeviceTwin { device_id } => {
            info!("patch_device_twin triggered for device: {}", device_id);
            info!("IoT Hub registry manager connecting to client...");
            let mut registry = HttpRegistryManager::new(&config.service()?);
            service::patch_device_twin(&mut registry, &device_id)
                .await
                .map(|_| ())
        }
        Commands::ListenForPatch => {
            info!("listen_for_patch triggered");
            let connector = MqttConnector::new(config.device()?);
            device::listen_for_patch(connector, cancel::operator_quit())
                .await
                .map(|summary| info!("received {} patches", summary.events_handled))
        }
        Commands::ListenForModuleMsg { output } => {
            info!("listen_for_module_msg triggered, forwarding to {}", output);
            let connector = MqttConnector::new(config.module()?);
            edge::relay_messages(connector, &output, cancel::termination_signal())
                .await
                .map(|summary| info!("relayed {} messages", summary.replies_sent))
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Cli::parse();

    let default_filter = if args.verbose { "trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = match SimulatorConfig::load(args.config.as_deref()) {
        Ok(config) => config.with_overrides(
            args.device_connection_string,
            args.service_connection_string,
            args.module_connection_string,
        ),
        Err(e) => {
            error!("could not load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args.cmd, config).await {
        e.report();
        // The stdin listener thread may still be blocked on a read
        std::process::exit(1);
    }
}
