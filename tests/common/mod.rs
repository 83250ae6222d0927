#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};

use azure_iot_simulator::service::{
    CloudToDeviceMethod, CloudToDeviceMethodResult, RegistryManager, Twin,
};
use azure_iot_simulator::upload::{
    BlobStorage, FileUploadTransport, StorageInfo, UploadNotification,
};
use azure_iot_simulator::{
    Connector, DirectMethodResponse, EventKind, InboundEvent, IoTHubError, Message, Subscription,
    Transport,
};

/// Everything the fake transports were asked to do
#[derive(Debug, Default)]
pub struct Calls {
    pub connects: usize,
    pub shutdowns: usize,
    pub subscribed: Vec<EventKind>,
    pub sent: Vec<Message>,
    pub forwarded: Vec<(String, Message)>,
    pub responses: Vec<DirectMethodResponse>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub connect: bool,
    pub subscribe: bool,
    pub send: bool,
    pub shutdown: bool,
}

/// Connector whose transport delivers whatever the test pushes into `events`
#[derive(Debug)]
pub struct FakeConnector {
    pub calls: Arc<Mutex<Calls>>,
    events: Mutex<Option<Receiver<InboundEvent>>>,
    failures: Failures,
}

impl FakeConnector {
    pub fn new() -> (Self, Sender<InboundEvent>) {
        Self::failing(Failures::default())
    }

    pub fn failing(failures: Failures) -> (Self, Sender<InboundEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let connector = Self {
            calls: Arc::new(Mutex::new(Calls::default())),
            events: Mutex::new(Some(rx)),
            failures,
        };
        (connector, tx)
    }

    pub fn calls(&self) -> Arc<Mutex<Calls>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> azure_iot_simulator::Result<FakeTransport> {
        self.calls.lock().unwrap().connects += 1;
        if self.failures.connect {
            return Err(IoTHubError::ConnectionRefused("fake refused".to_string()));
        }
        Ok(FakeTransport {
            calls: self.calls.clone(),
            events: self.events.lock().unwrap().take(),
            subscribed: HashSet::new(),
            failures: self.failures,
        })
    }
}

#[derive(Debug)]
pub struct FakeTransport {
    calls: Arc<Mutex<Calls>>,
    events: Option<Receiver<InboundEvent>>,
    subscribed: HashSet<EventKind>,
    failures: Failures,
}

impl FakeTransport {
    fn send_result(&self) -> azure_iot_simulator::Result<()> {
        if self.failures.send {
            Err(IoTHubError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_message(&mut self, message: Message) -> azure_iot_simulator::Result<()> {
        self.send_result()?;
        self.calls.lock().unwrap().sent.push(message);
        Ok(())
    }

    async fn send_message_to_output(
        &mut self,
        message: Message,
        output: &str,
    ) -> azure_iot_simulator::Result<()> {
        self.send_result()?;
        self.calls
            .lock()
            .unwrap()
            .forwarded
            .push((output.to_string(), message));
        Ok(())
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> azure_iot_simulator::Result<()> {
        self.send_result()?;
        self.calls.lock().unwrap().responses.push(response);
        Ok(())
    }

    async fn subscribe(&mut self, kind: EventKind) -> azure_iot_simulator::Result<Subscription> {
        if self.failures.subscribe {
            return Err(IoTHubError::Other("subscribe refused".to_string()));
        }
        if !self.subscribed.insert(kind) {
            return Err(IoTHubError::AlreadySubscribed(kind));
        }
        self.calls.lock().unwrap().subscribed.push(kind);
        let events = match self.events.take() {
            Some(events) => events,
            None => mpsc::channel(1).1,
        };
        Ok(Subscription::new(kind, events))
    }

    async fn unsubscribe(&mut self, kind: EventKind) -> azure_iot_simulator::Result<()> {
        self.subscribed.remove(&kind);
        Ok(())
    }

    async fn shutdown(&mut self) -> azure_iot_simulator::Result<()> {
        self.calls.lock().unwrap().shutdowns += 1;
        if self.failures.shutdown {
            return Err(IoTHubError::Other("shutdown failed".to_string()));
        }
        Ok(())
    }
}

/// Resolves once `done` holds for the recorded calls
pub async fn until<F>(calls: Arc<Mutex<Calls>>, done: F)
where
    F: Fn(&Calls) -> bool,
{
    loop {
        let finished = done(&calls.lock().unwrap());
        if finished {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Registry manager recording every call in order
#[derive(Debug, Default)]
pub struct FakeRegistry {
    pub twin: Option<Twin>,
    pub calls: Vec<String>,
    pub c2d_messages: Vec<(String, Message)>,
    pub methods: Vec<(String, CloudToDeviceMethod)>,
    pub updates: Vec<(String, Twin, String)>,
}

#[async_trait]
impl RegistryManager for FakeRegistry {
    async fn send_c2d_message(
        &mut self,
        device_id: &str,
        message: Message,
    ) -> azure_iot_simulator::Result<()> {
        self.calls.push("send_c2d_message".to_string());
        self.c2d_messages.push((device_id.to_string(), message));
        Ok(())
    }

    async fn invoke_device_method(
        &mut self,
        device_id: &str,
        method: &CloudToDeviceMethod,
    ) -> azure_iot_simulator::Result<CloudToDeviceMethodResult> {
        self.calls.push("invoke_device_method".to_string());
        self.methods.push((device_id.to_string(), method.clone()));
        Ok(CloudToDeviceMethodResult {
            status: 200,
            payload: serde_json::json!({"result": true, "data": "some data"}),
        })
    }

    async fn get_twin(&mut self, _device_id: &str) -> azure_iot_simulator::Result<Option<Twin>> {
        self.calls.push("get_twin".to_string());
        Ok(self.twin.clone())
    }

    async fn update_twin(
        &mut self,
        device_id: &str,
        patch: &Twin,
        etag: &str,
    ) -> azure_iot_simulator::Result<Twin> {
        self.calls.push("update_twin".to_string());
        self.updates
            .push((device_id.to_string(), patch.clone(), etag.to_string()));
        Ok(patch.clone())
    }
}

/// Hub and storage sides of an upload, sharing one step log
#[derive(Debug, Clone, Default)]
pub struct FakeUpload {
    pub steps: Arc<Mutex<Vec<&'static str>>>,
    pub notifications: Arc<Mutex<Vec<UploadNotification>>>,
    pub uploaded: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    pub storage_error: Option<u16>,
    pub info_error: bool,
}

impl FakeUpload {
    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileUploadTransport for FakeUpload {
    async fn get_storage_info_for_blob(
        &mut self,
        blob_name: &str,
    ) -> azure_iot_simulator::Result<StorageInfo> {
        self.steps.lock().unwrap().push("storage_info");
        if self.info_error {
            return Err(IoTHubError::ServiceResponse {
                status: 401,
                body: "unauthorized".to_string(),
            });
        }
        Ok(StorageInfo {
            correlation_id: "correlation-1".to_string(),
            host_name: "account.blob.core.windows.net".to_string(),
            container_name: "uploads".to_string(),
            blob_name: format!("dev/{}", blob_name),
            sas_token: "?sig=abc".to_string(),
        })
    }

    async fn notify_blob_upload_status(
        &mut self,
        notification: &UploadNotification,
    ) -> azure_iot_simulator::Result<()> {
        self.steps.lock().unwrap().push("notify");
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for FakeUpload {
    async fn upload(
        &self,
        info: &StorageInfo,
        content: Vec<u8>,
    ) -> azure_iot_simulator::Result<()> {
        self.steps.lock().unwrap().push("upload");
        if let Some(status) = self.storage_error {
            return Err(IoTHubError::ServiceResponse {
                status,
                body: "AuthenticationFailed".to_string(),
            });
        }
        self.uploaded
            .lock()
            .unwrap()
            .push((info.blob_url(), content));
        Ok(())
    }
}
