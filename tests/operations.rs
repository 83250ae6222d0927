mod common;

use serde_json::{json, Value};

use azure_iot_simulator::service::{self, Twin};
use azure_iot_simulator::upload;
use azure_iot_simulator::{device, IoTHubError};
use common::{FakeConnector, FakeRegistry, FakeUpload, Failures};

#[tokio::test]
async fn device_status_message_is_sent_on_one_connection() {
    let (connector, _events) = FakeConnector::new();
    let calls = connector.calls();

    device::send_status_message(&connector, "success").await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(calls.connects, 1);
    assert_eq!(calls.shutdowns, 1);
    assert_eq!(calls.sent.len(), 1);

    let message = &calls.sent[0];
    let body: Value = serde_json::from_slice(&message.body).unwrap();
    assert_eq!(body, json!({"status": "success", "message": "success-based message"}));
    assert_eq!(message.content_type(), Some("application/json"));
    assert_eq!(message.content_encoding(), Some("utf-8"));
    assert!(message.message_id().is_some());
    assert_eq!(
        message.properties().get("customFilterProperty").map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn invalid_device_status_never_connects() {
    let (connector, _events) = FakeConnector::new();
    let calls = connector.calls();

    for status in ["pending", "Success", ""] {
        let result = device::send_status_message(&connector, status).await;
        assert!(matches!(result, Err(IoTHubError::InvalidStatus(_))));
    }

    let calls = calls.lock().unwrap();
    assert_eq!(calls.connects, 0);
    assert!(calls.sent.is_empty());
}

#[tokio::test]
async fn failed_send_still_shuts_down() {
    let (connector, _events) = FakeConnector::failing(Failures {
        send: true,
        ..Default::default()
    });
    let calls = connector.calls();

    let result = device::send_status_message(&connector, "error").await;

    assert!(matches!(result, Err(IoTHubError::ConnectionClosed)));
    assert_eq!(calls.lock().unwrap().shutdowns, 1);
}

#[tokio::test]
async fn cloud_status_message_targets_the_device() {
    let mut registry = FakeRegistry::default();

    service::send_c2d_status_message(&mut registry, "dev-1", "error")
        .await
        .unwrap();

    assert_eq!(registry.calls, vec!["send_c2d_message"]);
    let (device_id, message) = &registry.c2d_messages[0];
    assert_eq!(device_id, "dev-1");
    assert_eq!(message.content_type(), Some("application/json"));
    let body: Value = serde_json::from_slice(&message.body).unwrap();
    assert_eq!(body, json!({"status": "error", "message": "error-based message"}));
}

#[tokio::test]
async fn invalid_cloud_status_never_reaches_the_registry() {
    let mut registry = FakeRegistry::default();

    let result = service::send_c2d_status_message(&mut registry, "dev-1", "pending").await;

    assert!(matches!(result, Err(IoTHubError::InvalidStatus(_))));
    assert!(registry.calls.is_empty());
}

#[tokio::test]
async fn method_invocation_carries_sample_payload() {
    let mut registry = FakeRegistry::default();

    let result = service::invoke_method(&mut registry, "dev-1", "method1")
        .await
        .unwrap();

    assert_eq!(result.status, 200);
    let (device_id, method) = &registry.methods[0];
    assert_eq!(device_id, "dev-1");
    assert_eq!(method.method_name, "method1");
    assert_eq!(method.payload, json!({"sample": "data"}));
}

#[tokio::test]
async fn twin_patch_uses_the_current_etag() {
    let mut registry = FakeRegistry {
        twin: Some(Twin {
            device_id: Some("dev-1".to_string()),
            etag: Some("AAAAAAAAAAE=".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    service::patch_device_twin(&mut registry, "dev-1").await.unwrap();

    assert_eq!(registry.calls, vec!["get_twin", "update_twin"]);
    let (device_id, patch, etag) = &registry.updates[0];
    assert_eq!(device_id, "dev-1");
    assert_eq!(etag, "AAAAAAAAAAE=");
    assert_eq!(patch, &service::sample_twin_patch());
}

#[tokio::test]
async fn twin_patch_of_unknown_device_fails() {
    let mut registry = FakeRegistry::default();

    let result = service::patch_device_twin(&mut registry, "ghost").await;

    assert!(matches!(result, Err(IoTHubError::DeviceNotFound(id)) if id == "ghost"));
    assert_eq!(registry.calls, vec!["get_twin"]);
}

#[tokio::test]
async fn upload_runs_all_three_steps_in_order() {
    let mut hub = FakeUpload::default();
    let storage = hub.clone();

    let notification = upload::upload_file(
        &mut hub,
        &storage,
        "quickstart.txt",
        upload::DEFAULT_CONTENT.to_vec(),
    )
    .await
    .unwrap();

    assert_eq!(hub.steps(), vec!["storage_info", "upload", "notify"]);
    assert!(notification.is_success);
    assert_eq!(notification.status_code, 200);
    assert_eq!(notification.correlation_id, "correlation-1");

    let uploaded = storage.uploaded.lock().unwrap();
    assert_eq!(
        uploaded[0],
        (
            "https://account.blob.core.windows.net/uploads/dev/quickstart.txt?sig=abc".to_string(),
            b"Hello, World!".to_vec()
        )
    );
}

#[tokio::test]
async fn failed_upload_still_notifies_the_hub() {
    let mut hub = FakeUpload {
        storage_error: Some(403),
        ..Default::default()
    };
    let storage = hub.clone();

    let result = upload::upload_file(&mut hub, &storage, "quickstart.txt", b"data".to_vec()).await;

    match result {
        Err(IoTHubError::UploadFailed {
            status,
            description,
        }) => {
            assert_eq!(status, 403);
            assert!(description.starts_with("Storage Blob Upload Error: "));
        }
        other => panic!("unexpected result {:?}", other),
    }

    assert_eq!(hub.steps(), vec!["storage_info", "upload", "notify"]);
    let notifications = hub.notifications.lock().unwrap();
    assert_eq!(notifications.len(), 1);
    assert!(!notifications[0].is_success);
    assert_ne!(notifications[0].status_code, 200);
    assert!(!notifications[0].status_description.is_empty());
}

#[tokio::test]
async fn upload_stops_when_the_hub_refuses_storage() {
    let mut hub = FakeUpload {
        info_error: true,
        ..Default::default()
    };
    let storage = hub.clone();

    let result = upload::upload_file(&mut hub, &storage, "quickstart.txt", b"data".to_vec()).await;

    assert!(matches!(
        result,
        Err(IoTHubError::ServiceResponse { status: 401, .. })
    ));
    assert_eq!(hub.steps(), vec!["storage_info"]);
}
