//! MQTT Subscriber Client
//!
//! Connects to the broker, subscribes to the configured topic set, and runs
//! the delivery loop on a spawned task. Inbound publishes are handed to an
//! explicit channel; deliveries are never concurrent with each other.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::codec::{read_variable_int, Decoder, Encoder};
use crate::config::BrokerConfig;
use crate::protocol::{
    Connect, ConnectReturnCode, DecodeError, Packet, PubAck, Publish, QoS, SubAck, Subscribe,
    Subscription,
};

use super::{SubscriberError, SubscriberStatus};

/// One message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Raw payload bytes
    pub payload: Bytes,
}

/// Command sent to the delivery task
#[derive(Debug)]
enum Command {
    /// Disconnect cleanly and stop
    Shutdown,
}

/// MQTT subscriber handle
///
/// Created by [`Subscriber::connect`], which performs the full handshake
/// (connect, CONNACK, subscribe, SUBACK) before spawning the delivery loop,
/// so a broker that is down or rejecting us fails construction.
pub struct Subscriber {
    command_tx: mpsc::Sender<Command>,
    status: Arc<RwLock<SubscriberStatus>>,
    task: JoinHandle<()>,
}

impl Subscriber {
    /// Connect to the broker, subscribe, and start delivering messages to
    /// `inbound_tx`. A failure here is fatal to startup.
    pub async fn connect(
        config: BrokerConfig,
        max_packet_size: usize,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, SubscriberError> {
        let address = config.address();

        let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SubscriberError::Timeout)?
            .map_err(|e| SubscriberError::ConnectionLost(e.to_string()))?;
        stream.set_nodelay(true)?;

        debug!("TCP connected to {}", address);

        let encoder = Encoder::new();
        let decoder = Decoder::new().with_max_packet_size(max_packet_size);
        let (mut read_half, mut write_half) = stream.into_split();
        let mut read_buf = BytesMut::with_capacity(4096);
        let mut pending_skip = 0usize;
        let mut buf = BytesMut::new();

        // CONNECT / CONNACK
        let connect = Packet::Connect(Box::new(Connect {
            client_id: config.client_id.clone(),
            clean_session: true,
            keep_alive: config.keepalive,
            username: None,
            password: None,
        }));
        buf.clear();
        encoder.encode(&connect, &mut buf)?;
        write_half.write_all(&buf).await?;

        let packet = timeout(
            config.connect_timeout,
            next_packet(&mut read_half, &mut read_buf, &decoder, &mut pending_skip),
        )
        .await
        .map_err(|_| SubscriberError::Timeout)??;

        match packet {
            Packet::ConnAck(connack) => {
                info!(
                    "Connected to broker at {} (return code {:?})",
                    address, connack.return_code
                );
                if connack.return_code != ConnectReturnCode::Accepted {
                    return Err(SubscriberError::Rejected(format!(
                        "CONNACK return code {:?}",
                        connack.return_code
                    )));
                }
            }
            _ => return Err(SubscriberError::UnexpectedPacket("expected CONNACK")),
        }

        // SUBSCRIBE / SUBACK
        let qos = QoS::from_u8(config.qos).unwrap_or(QoS::AtMostOnce);
        let subscribe = Packet::Subscribe(Subscribe {
            packet_id: 1,
            subscriptions: config
                .topics
                .iter()
                .map(|topic| Subscription {
                    filter: topic.clone(),
                    qos,
                })
                .collect(),
        });
        buf.clear();
        encoder.encode(&subscribe, &mut buf)?;
        write_half.write_all(&buf).await?;

        // A retained message may arrive before the SUBACK; deliver it rather
        // than treating it as a protocol violation.
        loop {
            let packet = timeout(
                config.connect_timeout,
                next_packet(&mut read_half, &mut read_buf, &decoder, &mut pending_skip),
            )
            .await
            .map_err(|_| SubscriberError::Timeout)??;

            match packet {
                Packet::SubAck(suback) => {
                    check_suback(&config.topics, &suback)?;
                    info!("Subscribed to {} topics", config.topics.len());
                    for topic in &config.topics {
                        debug!("  subscribed: {}", topic);
                    }
                    break;
                }
                Packet::Publish(publish) => {
                    deliver(&encoder, &mut write_half, &inbound_tx, publish).await?;
                }
                Packet::PingResp => {}
                _ => return Err(SubscriberError::UnexpectedPacket("expected SUBACK")),
            }
        }

        // Handshake complete; hand the connection to the delivery task
        let (command_tx, command_rx) = mpsc::channel(8);
        let status = Arc::new(RwLock::new(SubscriberStatus::Connected));

        let task_status = status.clone();
        let keepalive = config.keepalive_duration();
        let task = tokio::spawn(async move {
            let result = delivery_loop(
                read_half,
                write_half,
                read_buf,
                encoder,
                decoder,
                keepalive,
                command_rx,
                inbound_tx,
            )
            .await;

            match result {
                Ok(()) => {
                    info!("Disconnected from broker");
                    *task_status.write() = SubscriberStatus::Disconnected;
                }
                Err(e) => {
                    error!("Broker connection ended: {}", e);
                    *task_status.write() = SubscriberStatus::Failed;
                }
            }
        });

        Ok(Self {
            command_tx,
            status,
            task,
        })
    }

    /// Current connection status
    pub fn status(&self) -> SubscriberStatus {
        *self.status.read()
    }

    /// Disconnect cleanly and wait for the delivery task to finish
    pub async fn stop(self) {
        let _ = self.command_tx.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Read until one complete packet is decodable from the buffer.
/// Oversized packets are drained from the stream and skipped; they must
/// not take the connection down. `pending_skip` tracks how many bytes of
/// an oversized packet remain to be discarded; it lives with the caller so
/// a read cancelled mid-drain (keepalive tick, shutdown) resumes the drain
/// instead of misparsing mid-packet bytes.
async fn next_packet<R: AsyncRead + Unpin>(
    read_half: &mut R,
    read_buf: &mut BytesMut,
    decoder: &Decoder,
    pending_skip: &mut usize,
) -> Result<Packet, SubscriberError> {
    loop {
        if *pending_skip > 0 {
            let drained = (*pending_skip).min(read_buf.len());
            let _ = read_buf.split_to(drained);
            *pending_skip -= drained;
        }

        if *pending_skip == 0 {
            match decoder.decode(read_buf) {
                Ok(Some((packet, consumed))) => {
                    let _ = read_buf.split_to(consumed);
                    return Ok(packet);
                }
                Ok(None) => {}
                Err(DecodeError::PacketTooLarge) => {
                    // The fixed header is always complete when the decoder
                    // reports the oversize (the length is read before the
                    // limit check), so the drain length is known up front
                    let (remaining, len_bytes) = read_variable_int(&read_buf[1..])?;
                    *pending_skip = 1 + len_bytes + remaining as usize;
                    warn!("Dropping oversized inbound packet ({} bytes)", *pending_skip);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let n = read_half.read_buf(read_buf).await?;
        if n == 0 {
            return Err(SubscriberError::ConnectionLost(
                "connection closed by broker".to_string(),
            ));
        }
    }
}

/// Verify every subscription in the SUBACK was granted
fn check_suback(topics: &[String], suback: &SubAck) -> Result<(), SubscriberError> {
    if suback.return_codes.len() != topics.len() {
        return Err(SubscriberError::Rejected(format!(
            "SUBACK carried {} return codes for {} subscriptions",
            suback.return_codes.len(),
            topics.len()
        )));
    }
    for (topic, code) in topics.iter().zip(&suback.return_codes) {
        if *code == SubAck::FAILURE {
            return Err(SubscriberError::Rejected(format!(
                "subscription to '{}' refused",
                topic
            )));
        }
    }
    Ok(())
}

/// Ack (QoS 1) and forward one inbound publish
async fn deliver<W: AsyncWrite + Unpin>(
    encoder: &Encoder,
    write_half: &mut W,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    publish: Publish,
) -> Result<(), SubscriberError> {
    if publish.qos == QoS::AtLeastOnce {
        if let Some(packet_id) = publish.packet_id {
            let mut buf = BytesMut::new();
            encoder.encode(&Packet::PubAck(PubAck { packet_id }), &mut buf)?;
            write_half.write_all(&buf).await?;
        }
    }

    // A full channel applies backpressure to the socket read loop, so a
    // slow queue endpoint stalls delivery of the next message; there is no
    // internal queueing beyond the channel. While stalled here the
    // keepalive arm of the loop cannot fire either, so a stall longer than
    // 1.5x the keepalive interval gets the client dropped by the broker.
    // queue.send_timeout bounds the stall well below that with the default
    // settings.
    inbound_tx
        .send(InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
        })
        .await
        .map_err(|_| SubscriberError::ConnectionLost("delivery channel closed".to_string()))
}

/// The delivery loop: socket reads, shutdown commands, keepalive pings
#[allow(clippy::too_many_arguments)]
async fn delivery_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut read_buf: BytesMut,
    encoder: Encoder,
    decoder: Decoder,
    keepalive: std::time::Duration,
    mut command_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<InboundMessage>,
) -> Result<(), SubscriberError> {
    let mut keepalive_timer = tokio::time::interval(keepalive);
    keepalive_timer.reset();

    let mut buf = BytesMut::new();
    let mut pending_skip = 0usize;

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Shutdown) | None => {
                        buf.clear();
                        encoder.encode(&Packet::Disconnect, &mut buf)?;
                        let _ = write_half.write_all(&buf).await;
                        let _ = write_half.shutdown().await;
                        return Ok(());
                    }
                }
            }

            packet = next_packet(&mut read_half, &mut read_buf, &decoder, &mut pending_skip) => {
                match packet? {
                    Packet::Publish(publish) => {
                        debug!(
                            "Received message on {} ({} bytes)",
                            publish.topic,
                            publish.payload.len()
                        );
                        deliver(&encoder, &mut write_half, &inbound_tx, publish).await?;
                    }
                    Packet::PingResp => {
                        debug!("PINGRESP received");
                    }
                    Packet::Disconnect => {
                        return Err(SubscriberError::ConnectionLost(
                            "broker sent DISCONNECT".to_string(),
                        ));
                    }
                    other => {
                        warn!("Ignoring unexpected packet type {}", other.packet_type());
                    }
                }
            }

            _ = keepalive_timer.tick() => {
                buf.clear();
                encoder.encode(&Packet::PingReq, &mut buf)?;
                write_half.write_all(&buf).await?;
            }
        }
    }
}
