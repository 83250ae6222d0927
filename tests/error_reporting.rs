mod common;

use std::sync::{Mutex, MutexGuard};

use log::{Level, LevelFilter, Log, Metadata, Record};

use azure_iot_simulator::{device, IoTHubError};
use common::FakeConnector;

struct CapturingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static LOGGER: CapturingLogger = CapturingLogger {
    records: Mutex::new(Vec::new()),
};

// Tests in this file share the logger, one at a time
static SERIAL: Mutex<()> = Mutex::new(());

fn capture_logs() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Trace);
    LOGGER.records.lock().unwrap().clear();
    guard
}

fn logged_errors() -> Vec<String> {
    LOGGER
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(level, _)| *level == Level::Error)
        .map(|(_, message)| message.clone())
        .collect()
}

#[tokio::test]
async fn invalid_status_logs_exactly_one_error() {
    let _capture = capture_logs();
    let (connector, _events) = FakeConnector::new();
    let calls = connector.calls();

    if let Err(e) = device::send_status_message(&connector, "pending").await {
        e.report();
    }

    assert_eq!(
        logged_errors(),
        vec!["pending is not an acceptable status, please use error or success".to_string()]
    );
    assert_eq!(calls.lock().unwrap().connects, 0);
}

#[test]
fn hub_failures_are_reported_as_unexpected() {
    let _capture = capture_logs();

    IoTHubError::ConnectionClosed.report();

    assert_eq!(
        logged_errors(),
        vec!["unexpected error from IoT Hub: connection to the hub was closed".to_string()]
    );
}
