use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use mqtt::control::variable_header::ConnectReturnCode;
use mqtt::packet::*;
use mqtt::{Encodable, QualityOfService, TopicFilter, TopicName};
use tokio::io::AsyncWriteExt;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_native_tls::{TlsConnector, TlsStream};

use crate::error::IoTHubError;
use crate::message::{
    DirectMethodInvocation, DirectMethodResponse, InboundEvent, Message, TwinPatch,
};
use crate::token::{DeviceConnectionString, TokenSource};
use crate::transport::{Connector, EventKind, Subscription, Transport};

// Incoming topic names
const METHOD_POST_TOPIC_FILTER: &str = "$iothub/methods/POST/#";
const METHOD_POST_TOPIC_PREFIX: &str = "$iothub/methods/POST/";
const TWIN_PATCH_TOPIC_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";
const TWIN_PATCH_TOPIC_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";

// Outgoing topic names
fn method_response_topic(status: i32, request_id: &str) -> String {
    format!("$iothub/methods/res/{}/?$rid={}", status, request_id)
}

const MQTT_PORT: u16 = 8883;
const KEEP_ALIVE: u16 = 10;
const API_VERSION: &str = "2021-04-12";
const REQUEST_ID_PARAM: &str = "$rid";
const EVENT_BUFFER: usize = 16;

pub(crate) type Socket = TlsStream<TcpStream>;
type Writer = Arc<Mutex<WriteHalf<Socket>>>;
type Handlers = Arc<Mutex<HashMap<EventKind, Sender<InboundEvent>>>>;

/// Topic layout of one device or module identity
#[derive(Debug, Clone)]
pub(crate) struct Topics {
    events: String,
    inbound_filter: String,
    inbound_prefix: String,
    is_module: bool,
}

impl Topics {
    pub(crate) fn new(device_id: &str, module_id: Option<&str>) -> Self {
        match module_id {
            Some(module_id) => Self {
                events: format!("devices/{}/modules/{}/messages/events/", device_id, module_id),
                inbound_filter: format!("devices/{}/modules/{}/inputs/#", device_id, module_id),
                inbound_prefix: format!("devices/{}/modules/{}/inputs/", device_id, module_id),
                is_module: true,
            },
            None => Self {
                events: format!("devices/{}/messages/events/", device_id),
                inbound_filter: format!("devices/{}/messages/devicebound/#", device_id),
                inbound_prefix: format!("devices/{}/messages/devicebound/", device_id),
                is_module: false,
            },
        }
    }

    fn filter(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Message => &self.inbound_filter,
            EventKind::MethodRequest => METHOD_POST_TOPIC_FILTER,
            EventKind::TwinPatch => TWIN_PATCH_TOPIC_FILTER,
        }
    }

    /// Turn a PUBLISH into the event it carries, `None` for topics no kind listens on
    pub(crate) fn route(&self, topic: &str, payload: &[u8]) -> crate::Result<Option<InboundEvent>> {
        if let Some(rest) = topic.strip_prefix(&self.inbound_prefix) {
            // Module inputs carry the input name before the properties
            let properties = if self.is_module {
                rest.split_once('/').map(|(_, props)| props).unwrap_or("")
            } else {
                rest
            };
            let mut message = Message::new(payload.to_vec());
            for (key, value) in parse_properties(properties)? {
                if key.starts_with("$.") {
                    message.system_properties.insert(key, value);
                } else {
                    message.properties.insert(key, value);
                }
            }
            return Ok(Some(InboundEvent::Message(message)));
        }

        if let Some(details) = topic.strip_prefix(METHOD_POST_TOPIC_PREFIX) {
            // $iothub/methods/POST/{method name}/?$rid={request id}
            let (method_name, query) = details
                .split_once('/')
                .ok_or_else(|| IoTHubError::TopicError(topic.to_string()))?;
            let request_id = parse_properties(query.trim_start_matches('?'))?
                .into_iter()
                .find(|(key, _)| key == REQUEST_ID_PARAM)
                .map(|(_, value)| value)
                .ok_or_else(|| IoTHubError::TopicError(topic.to_string()))?;

            return Ok(Some(InboundEvent::MethodRequest(DirectMethodInvocation {
                method_name: method_name.to_string(),
                message: Message::new(payload.to_vec()),
                request_id,
            })));
        }

        if topic.starts_with(TWIN_PATCH_TOPIC_PREFIX) {
            return Ok(Some(InboundEvent::TwinPatch(TwinPatch::from_slice(payload)?)));
        }

        Ok(None)
    }
}

fn parse_properties(encoded: &str) -> crate::Result<Vec<(String, String)>> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(encoded)
        .map_err(|e| IoTHubError::TopicError(format!("{}: {}", encoded, e)))
}

fn build_topic_name(base_topic: &str, message: &Message) -> crate::Result<TopicName> {
    let capacity = message.system_properties.len() + message.properties.len();
    let mut props = HashMap::with_capacity(capacity);
    props.extend(message.system_properties.iter());
    props.extend(message.properties.iter());

    // if we reuse the base_topic string as the target for the serializer,
    // we end up with an extra ampersand before the key/value pairs
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(props.iter())
        .finish();
    topic_name(format!("{}{}", base_topic, encoded))
}

fn topic_name(topic: String) -> crate::Result<TopicName> {
    TopicName::new(topic.clone())
        .map_err(|e| IoTHubError::TopicError(format!("{}: {:?}", topic, e)))
}

fn topic_filter(filter: &str) -> crate::Result<TopicFilter> {
    TopicFilter::new(filter).map_err(|e| IoTHubError::TopicError(format!("{}: {:?}", filter, e)))
}

fn encode<P>(packet: &P) -> crate::Result<Vec<u8>>
where
    P: Encodable,
    P::Err: fmt::Display,
{
    let mut buf = Vec::new();
    packet
        .encode(&mut buf)
        .map_err(|e| IoTHubError::EncodeError(e.to_string()))?;
    Ok(buf)
}

/// Claim the single slot for `kind`
async fn register_handler(
    handlers: &Handlers,
    kind: EventKind,
    sender: Sender<InboundEvent>,
) -> crate::Result<()> {
    let mut handlers = handlers.lock().await;
    if handlers.contains_key(&kind) {
        return Err(IoTHubError::AlreadySubscribed(kind));
    }
    handlers.insert(kind, sender);
    Ok(())
}

async fn write_all(socket: &Mutex<WriteHalf<Socket>>, buf: &[u8]) -> crate::Result<()> {
    socket
        .lock()
        .await
        .write_all(buf)
        .await
        .map_err(|e| e.into())
}

/// TLS 1.2 stream to `host:port`
pub(crate) async fn tls_connect(host: &str, port: u16) -> crate::Result<Socket> {
    let socket = TcpStream::connect((host, port)).await?;

    trace!("Connected to tcp socket {:?}", socket);

    let cx = TlsConnector::from(
        native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
            .build()?,
    );

    let socket = cx.connect(host, socket).await?;

    trace!("Connected tls context to {}", host);

    Ok(socket)
}

async fn mqtt_connect(
    iot_hub: &str,
    client_id: &str,
    username: impl ToString,
    password: impl ToString,
) -> crate::Result<Socket> {
    let mut socket = tls_connect(iot_hub, MQTT_PORT).await?;

    let mut conn = ConnectPacket::new(client_id);
    conn.set_client_identifier(client_id);
    conn.set_clean_session(false);
    conn.set_keep_alive(KEEP_ALIVE);
    conn.set_user_name(Some(username.to_string()));
    conn.set_password(Some(password.to_string()));

    socket.write_all(&encode(&conn)?).await?;

    let packet = VariablePacket::parse(&mut socket).await;

    trace!("PACKET {:?}", packet);
    match packet {
        Ok(VariablePacket::ConnackPacket(connack)) => {
            if connack.connect_return_code() != ConnectReturnCode::ConnectionAccepted {
                return Err(IoTHubError::ConnectionRefused(format!(
                    "return code {:?}",
                    connack.connect_return_code()
                )));
            }
        }
        Ok(pck) => {
            return Err(IoTHubError::ConnectionRefused(format!(
                "unexpected packet received after connect {:?}",
                pck
            )))
        }
        Err(err) => return Err(err.into()),
    }

    Ok(socket)
}

async fn keep_alive(write_socket: Writer) {
    let mut interval = time::interval(time::Duration::from_secs(KEEP_ALIVE.into()));
    // first tick completes immediately, right after CONNACK
    interval.tick().await;
    loop {
        interval.tick().await;

        trace!("Sending PINGREQ to broker");
        let sent = match encode(&PingreqPacket::new()) {
            Ok(buf) => write_all(&write_socket, &buf).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Stopping keep alive: {}", e);
            break;
        }
    }
}

async fn receive_loop(mut socket: ReadHalf<Socket>, topics: Topics, handlers: Handlers) {
    loop {
        let packet = match VariablePacket::parse(&mut socket).await {
            Ok(pk) => pk,
            Err(err) => {
                error!("Error in receiving packet {}", err);
                break;
            }
        };

        match packet {
            VariablePacket::PublishPacket(ref publ) => {
                let event = match topics.route(publ.topic_name(), &publ.payload_ref()[..]) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        trace!("Ignoring PUBLISH on {}", publ.topic_name());
                        continue;
                    }
                    Err(e) => {
                        warn!("Dropping PUBLISH on {}: {}", publ.topic_name(), e);
                        continue;
                    }
                };

                let kind = event.kind();
                let sender = handlers.lock().await.get(&kind).cloned();
                match sender {
                    Some(tx) => {
                        if tx.send(event).await.is_err() {
                            debug!("{} subscription was dropped", kind);
                        }
                    }
                    None => debug!("No {} handler registered, dropping event", kind),
                }
            }
            VariablePacket::PingrespPacket(..) => trace!("Receiving PINGRESP from broker"),
            other => trace!("Received PACKET {:?}", other),
        }
    }

    // Dropping the senders ends every open subscription
    handlers.lock().await.clear();
}

/// MQTT connection to the hub (or an edge gateway) for one device or module identity
pub struct MqttTransport {
    write_socket: Writer,
    read_socket: Option<ReadHalf<Socket>>,
    topics: Topics,
    handlers: Handlers,
    reader: Option<JoinHandle<()>>,
    pinger: Option<JoinHandle<()>>,
    packet_id: u16,
    closed: bool,
}

impl fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttTransport")
            .field("topics", &self.topics)
            .field("closed", &self.closed)
            .finish()
    }
}

impl MqttTransport {
    /// Connect to the hub with the identity of `connection`
    pub async fn connect(connection: &DeviceConnectionString) -> crate::Result<MqttTransport> {
        let client_id = connection.client_id();
        let user_name = format!(
            "{}/{}/?api-version={}&DeviceClientType=azure-iot-simulator%2F{}",
            connection.host_name,
            client_id,
            API_VERSION,
            crate::SDK_VERSION
        );

        let expiry = Utc::now() + Duration::days(1);
        trace!("Generating token that will expire at {}", expiry);
        let token = connection.token_source().get(&expiry)?;

        let socket = mqtt_connect(connection.connect_host(), &client_id, user_name, token).await?;

        let (read_socket, write_socket) = tokio::io::split(socket);
        let write_socket = Arc::new(Mutex::new(write_socket));
        let pinger = tokio::spawn(keep_alive(write_socket.clone()));

        Ok(Self {
            write_socket,
            read_socket: Some(read_socket),
            topics: Topics::new(&connection.device_id, connection.module_id.as_deref()),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            reader: None,
            pinger: Some(pinger),
            packet_id: 0,
            closed: false,
        })
    }

    fn next_packet_id(&mut self) -> u16 {
        self.packet_id = self.packet_id.checked_add(1).unwrap_or(1);
        self.packet_id
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.closed {
            Err(IoTHubError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    async fn publish(&mut self, topic: TopicName, payload: Vec<u8>) -> crate::Result<()> {
        self.ensure_open()?;
        let packet = PublishPacket::new(topic, QoSWithPacketIdentifier::Level0, payload);
        write_all(&self.write_socket, &encode(&packet)?).await
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn send_message(&mut self, message: Message) -> crate::Result<()> {
        let full_topic = build_topic_name(&self.topics.events, &message)?;
        trace!("Sending message {:?} to topic {:?}", message, full_topic);
        self.publish(full_topic, message.body).await
    }

    async fn send_message_to_output(
        &mut self,
        mut message: Message,
        output: &str,
    ) -> crate::Result<()> {
        if !self.topics.is_module {
            return Err(IoTHubError::Unsupported("sending to a module output from a device"));
        }
        message.set_output_name(output);
        self.send_message(message).await
    }

    async fn respond_to_direct_method(
        &mut self,
        response: DirectMethodResponse,
    ) -> crate::Result<()> {
        trace!(
            "Responding to direct method with rid = {}",
            response.request_id
        );
        let topic = topic_name(method_response_topic(response.status, &response.request_id))?;
        self.publish(topic, response.body.into_bytes()).await
    }

    async fn subscribe(&mut self, kind: EventKind) -> crate::Result<Subscription> {
        self.ensure_open()?;
        let filter = topic_filter(self.topics.filter(kind))?;

        let (handler_tx, handler_rx) = channel::<InboundEvent>(EVENT_BUFFER);
        register_handler(&self.handlers, kind, handler_tx).await?;

        if let Some(read_socket) = self.read_socket.take() {
            self.reader = Some(tokio::spawn(receive_loop(
                read_socket,
                self.topics.clone(),
                self.handlers.clone(),
            )));
        }

        trace!("Subscribing to {:?}", filter);
        let packet = SubscribePacket::new(
            self.next_packet_id(),
            vec![(filter, QualityOfService::Level0)],
        );
        let sent = match encode(&packet) {
            Ok(buf) => write_all(&self.write_socket, &buf).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.handlers.lock().await.remove(&kind);
            return Err(e);
        }

        Ok(Subscription::new(kind, handler_rx))
    }

    async fn unsubscribe(&mut self, kind: EventKind) -> crate::Result<()> {
        self.ensure_open()?;
        if self.handlers.lock().await.remove(&kind).is_none() {
            return Ok(());
        }

        let filter = topic_filter(self.topics.filter(kind))?;
        trace!("Unsubscribing from {:?}", filter);
        let packet = UnsubscribePacket::new(self.next_packet_id(), vec![filter]);
        write_all(&self.write_socket, &encode(&packet)?).await
    }

    async fn shutdown(&mut self) -> crate::Result<()> {
        if self.closed {
            return Ok(());
        }

        let kinds: Vec<EventKind> = self.handlers.lock().await.keys().copied().collect();
        for kind in kinds {
            // If the connection is lost, unsubscribing fails and that is fine
            if let Err(e) = self.unsubscribe(kind).await {
                debug!("Could not unsubscribe {}: {}", kind, e);
            }
        }
        self.closed = true;

        let result = match encode(&DisconnectPacket::new()) {
            Ok(buf) => write_all(&self.write_socket, &buf).await,
            Err(e) => Err(e),
        };

        if let Some(pinger) = self.pinger.take() {
            pinger.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let _ = self.write_socket.lock().await.shutdown().await;

        result
    }
}

/// Opens MQTT Transport Handles for one device or module identity
#[derive(Debug, Clone)]
pub struct MqttConnector {
    connection: DeviceConnectionString,
}

impl MqttConnector {
    ///
    pub fn new(connection: DeviceConnectionString) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Transport = MqttTransport;

    async fn connect(&self) -> crate::Result<MqttTransport> {
        debug!(
            "Connecting to {} as {}",
            self.connection.connect_host(),
            self.connection.client_id()
        );
        MqttTransport::connect(&self.connection).await
    }
}
