//! End-to-End Bridge Tests
//!
//! Runs the bridge against an in-process fake broker and a mock queue
//! endpoint, then publishes sensor payloads and asserts what reaches the
//! queue.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use fleetbridge::bridge::Bridge;
use fleetbridge::codec::{Decoder, Encoder};
use fleetbridge::config::Config;
use fleetbridge::protocol::{ConnAck, ConnectReturnCode, Packet, Publish, QoS, SubAck};

/// A single-connection broker speaking just enough MQTT for the bridge:
/// CONNACK the connect, SUBACK the subscription, then push whatever the
/// test feeds through the publish channel.
struct FakeBroker {
    port: u16,
    publish_tx: mpsc::Sender<(String, Bytes)>,
}

impl FakeBroker {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let (publish_tx, publish_rx) = mpsc::channel(32);

        tokio::spawn(serve(listener, publish_rx));

        Self { port, publish_tx }
    }

    async fn publish(&self, topic: &str, payload: &[u8]) {
        self.publish_tx
            .send((topic.to_string(), Bytes::copy_from_slice(payload)))
            .await
            .expect("broker task gone");
    }
}

async fn serve(listener: TcpListener, mut publish_rx: mpsc::Receiver<(String, Bytes)>) {
    let (mut stream, _) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(_) => return,
    };

    let encoder = Encoder::new();
    let decoder = Decoder::new();
    let mut read_buf = BytesMut::new();
    let mut write_buf = BytesMut::new();

    // CONNECT -> CONNACK
    match next_packet(&mut stream, &mut read_buf, &decoder).await {
        Some(Packet::Connect(_)) => {
            let connack = Packet::ConnAck(ConnAck {
                session_present: false,
                return_code: ConnectReturnCode::Accepted,
            });
            send(&encoder, &mut stream, &mut write_buf, &connack).await;
        }
        _ => return,
    }

    // SUBSCRIBE -> SUBACK
    match next_packet(&mut stream, &mut read_buf, &decoder).await {
        Some(Packet::Subscribe(subscribe)) => {
            let suback = Packet::SubAck(SubAck {
                packet_id: subscribe.packet_id,
                return_codes: vec![0; subscribe.subscriptions.len()],
            });
            send(&encoder, &mut stream, &mut write_buf, &suback).await;
        }
        _ => return,
    }

    loop {
        tokio::select! {
            outbound = publish_rx.recv() => {
                match outbound {
                    Some((topic, payload)) => {
                        let publish = Packet::Publish(Publish {
                            dup: false,
                            qos: QoS::AtMostOnce,
                            retain: false,
                            topic,
                            packet_id: None,
                            payload,
                        });
                        send(&encoder, &mut stream, &mut write_buf, &publish).await;
                    }
                    None => return,
                }
            }
            inbound = next_packet(&mut stream, &mut read_buf, &decoder) => {
                match inbound {
                    Some(Packet::PingReq) => {
                        send(&encoder, &mut stream, &mut write_buf, &Packet::PingResp).await;
                    }
                    Some(Packet::Disconnect) | None => return,
                    Some(_) => {}
                }
            }
        }
    }
}

async fn next_packet(
    stream: &mut TcpStream,
    read_buf: &mut BytesMut,
    decoder: &Decoder,
) -> Option<Packet> {
    loop {
        if let Ok(Some((packet, consumed))) = decoder.decode(read_buf) {
            let _ = read_buf.split_to(consumed);
            return Some(packet);
        }
        match stream.read_buf(read_buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send(encoder: &Encoder, stream: &mut TcpStream, buf: &mut BytesMut, packet: &Packet) {
    buf.clear();
    encoder.encode(packet, buf).expect("encode");
    stream.write_all(buf).await.expect("write");
}

fn test_config(broker_port: u16, queue_endpoint: &str) -> Config {
    let mut config = Config::default();
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = broker_port;
    config.broker.connect_timeout = Duration::from_secs(5);
    config.queue.url = "http://localhost:4566/000000000000/telemetry".to_string();
    config.queue.endpoint = Some(queue_endpoint.to_string());
    config.queue.send_timeout = Duration::from_secs(5);
    config
}

/// Start the bridge and return a shutdown handle plus the join handle
/// for its run loop.
async fn start_bridge(
    config: Config,
) -> (
    oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<(), fleetbridge::BridgeError>>,
) {
    let mut bridge = Bridge::new(config).expect("queue client");
    bridge.connect().await.expect("broker handshake");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(bridge.run(async {
        let _ = shutdown_rx.await;
    }));
    (shutdown_tx, handle)
}

/// Poll a mock until it has been hit, bounded by a deadline
async fn wait_for_mock(mock: &mockito::Mock) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !mock.matched_async().await {
        if tokio::time::Instant::now() > deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn sqs_response(message_id: &str) -> String {
    format!(
        "<SendMessageResponse><SendMessageResult>\
         <MessageId>{}</MessageId>\
         </SendMessageResult></SendMessageResponse>",
        message_id
    )
}

#[tokio::test]
async fn test_gyroscope_message_forwarded_with_envelope() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("Action".into(), "SendMessage".into()),
            mockito::Matcher::UrlEncoded(
                "MessageBody".into(),
                r#"{"type":"gyroscope","data":{"x":1,"y":2,"z":3}}"#.into(),
            ),
        ]))
        .with_status(200)
        .with_body(sqs_response("m-1"))
        .create_async()
        .await;

    let (shutdown_tx, handle) = start_bridge(test_config(broker.port, &server.url())).await;

    broker
        .publish("sensor/gyroscope", br#"{"x":1,"y":2,"z":3}"#)
        .await;

    wait_for_mock(&mock).await;
    mock.assert_async().await;

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop hung")
        .expect("join")
        .expect("clean shutdown");
}

#[tokio::test]
async fn test_gps_message_forwarded_with_envelope() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::UrlEncoded(
            "MessageBody".into(),
            r#"{"type":"gps","data":{"lat":37.0,"lon":-122.0}}"#.into(),
        ))
        .with_status(200)
        .with_body(sqs_response("m-2"))
        .create_async()
        .await;

    let (shutdown_tx, handle) = start_bridge(test_config(broker.port, &server.url())).await;

    broker
        .publish("sensor/gps", br#"{"lat":37.0,"lon":-122.0}"#)
        .await;

    wait_for_mock(&mock).await;
    mock.assert_async().await;

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn test_malformed_payload_dropped_and_bridge_continues() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;

    // Only the valid message may reach the queue
    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::UrlEncoded(
            "MessageBody".into(),
            r#"{"type":"photo","data":{"seq":2}}"#.into(),
        ))
        .with_status(200)
        .with_body(sqs_response("m-3"))
        .expect(1)
        .create_async()
        .await;

    let (shutdown_tx, handle) = start_bridge(test_config(broker.port, &server.url())).await;

    broker.publish("sensor/photo", b"not-json").await;
    broker.publish("sensor/photo", br#"{"seq":2}"#).await;

    wait_for_mock(&mock).await;
    mock.assert_async().await;

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn test_oversized_publish_dropped_and_bridge_continues() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;

    // Only the small follow-up message may reach the queue
    let mock = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::UrlEncoded(
            "MessageBody".into(),
            r#"{"type":"gps","data":{"seq":1}}"#.into(),
        ))
        .with_status(200)
        .with_body(sqs_response("m-6"))
        .expect(1)
        .create_async()
        .await;

    let mut config = test_config(broker.port, &server.url());
    config.limits.max_payload_size = 16;

    let (shutdown_tx, handle) = start_bridge(config).await;

    // Well past the limit plus framing headroom; the connection must
    // survive the drop
    let oversized = vec![b'x'; 4096];
    broker.publish("sensor/gps", &oversized).await;
    broker.publish("sensor/gps", br#"{"seq":1}"#).await;

    wait_for_mock(&mock).await;
    mock.assert_async().await;

    let _ = shutdown_tx.send(());
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop hung")
        .expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_queue_failure_dropped_and_next_message_forwarded() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;

    // The first message hits a server error, the second succeeds
    let failing = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::UrlEncoded(
            "MessageBody".into(),
            r#"{"type":"gps","data":{"seq":1}}"#.into(),
        ))
        .with_status(500)
        .with_body(
            "<ErrorResponse><Error><Code>InternalError</Code>\
             <Message>try later</Message></Error></ErrorResponse>",
        )
        .expect(1)
        .create_async()
        .await;
    let succeeding = server
        .mock("POST", "/")
        .match_body(mockito::Matcher::UrlEncoded(
            "MessageBody".into(),
            r#"{"type":"gps","data":{"seq":2}}"#.into(),
        ))
        .with_status(200)
        .with_body(sqs_response("m-4"))
        .expect(1)
        .create_async()
        .await;

    let (shutdown_tx, handle) = start_bridge(test_config(broker.port, &server.url())).await;

    broker.publish("sensor/gps", br#"{"seq":1}"#).await;
    broker.publish("sensor/gps", br#"{"seq":2}"#).await;

    wait_for_mock(&succeeding).await;
    failing.assert_async().await;
    succeeding.assert_async().await;

    let _ = shutdown_tx.send(());
    let _ = timeout(Duration::from_secs(5), handle).await;
}

#[tokio::test]
async fn test_connect_fails_when_broker_down() {
    // Grab a port that nothing is listening on
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let mut config = test_config(port, "http://localhost:4566");
    config.broker.connect_timeout = Duration::from_secs(2);

    let mut bridge = Bridge::new(config).expect("queue client");
    assert!(bridge.connect().await.is_err());
}

#[tokio::test]
async fn test_shutdown_disconnects_cleanly() {
    let broker = FakeBroker::start().await;
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(sqs_response("m-5"))
        .create_async()
        .await;

    let (shutdown_tx, handle) = start_bridge(test_config(broker.port, &server.url())).await;

    let _ = shutdown_tx.send(());
    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("run loop hung")
        .expect("join");
    assert!(result.is_ok());
}
