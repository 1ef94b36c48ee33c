//! TCP broker client.
//!
//! Wire protocol: every frame is a u32 little-endian length prefix followed
//! by a bincode-encoded enum. Clients send [`ClientFrame`]s, broker nodes
//! send [`ServerFrame`]s. Delivery acknowledgment is explicit: the node
//! retains a message until the client returns `Ack { seq }` for it.
//!
//! A [`SocketSubscriber`] connects to *every* configured endpoint and fans
//! the resulting delivery streams into a single [`Subscription`], so a
//! topic sharded across broker nodes is archived by one daemon.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BrokerError;
use crate::{Delivery, Publisher, Subscriber, Subscription};

const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Serialize, Deserialize)]
enum ClientFrame {
    Subscribe { topic: String, channel: String },
    Ack { seq: u64 },
    Publish { topic: String, body: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize)]
enum ServerFrame {
    Deliver { seq: u64, body: Vec<u8> },
}

async fn write_frame<T, W>(stream: &mut W, frame: &T) -> Result<(), BrokerError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = bincode::serialize(frame)?;
    stream.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed cleanly between frames.
async fn read_frame<T, R>(stream: &mut R) -> Result<Option<T>, BrokerError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}

/// Publishes to one broker endpoint over a lazily established connection.
///
/// A failed write drops the connection; the next publish reconnects. The
/// failed message itself is not retried here; that policy belongs to the
/// caller.
#[derive(Debug)]
pub struct SocketPublisher {
    endpoint: String,
    conn: Mutex<Option<TcpStream>>,
}

impl SocketPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Publisher for SocketPublisher {
    async fn publish(&self, topic: &str, body: Bytes) -> Result<(), BrokerError> {
        let mut conn = self.conn.lock().await;

        if conn.is_none() {
            let stream = TcpStream::connect(&self.endpoint).await.map_err(|source| {
                BrokerError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                }
            })?;
            debug!(endpoint = %self.endpoint, "publisher connected");
            *conn = Some(stream);
        }

        let frame = ClientFrame::Publish {
            topic: topic.to_string(),
            body: body.to_vec(),
        };
        let stream = conn.as_mut().expect("connection established above");
        if let Err(e) = write_frame(stream, &frame).await {
            *conn = None;
            return Err(e);
        }
        Ok(())
    }
}

/// Opens subscriptions against a set of broker endpoints.
#[derive(Debug)]
pub struct SocketSubscriber {
    endpoints: Vec<String>,
    max_in_flight: usize,
}

impl SocketSubscriber {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// `max_in_flight` bounds deliveries buffered ahead of the consumer,
    /// shared across all endpoint connections.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

#[async_trait]
impl Subscriber for SocketSubscriber {
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
    ) -> Result<Subscription, BrokerError> {
        if self.endpoints.is_empty() {
            return Err(BrokerError::NoEndpoints);
        }

        let (tx, rx) = mpsc::channel(self.max_in_flight);
        let cancel = CancellationToken::new();

        for endpoint in &self.endpoints {
            let stream = TcpStream::connect(endpoint).await.map_err(|source| {
                BrokerError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                }
            })?;
            let mut stream = stream;
            write_frame(
                &mut stream,
                &ClientFrame::Subscribe {
                    topic: topic.to_string(),
                    channel: channel.to_string(),
                },
            )
            .await?;
            info!(endpoint = %endpoint, topic, channel, "subscribed");

            let (mut read_half, mut write_half) = stream.into_split();
            let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<u64>();

            // Ack writer: lives until every outstanding delivery for this
            // connection is acked or dropped.
            let ack_endpoint = endpoint.clone();
            tokio::spawn(async move {
                while let Some(seq) = ack_rx.recv().await {
                    if let Err(e) = write_frame(&mut write_half, &ClientFrame::Ack { seq }).await
                    {
                        warn!(endpoint = %ack_endpoint, error = %e, "ack write failed");
                        break;
                    }
                }
            });

            // Delivery reader: forwards into the shared subscription
            // channel; bounded capacity is the consumer prefetch window.
            let deliver_tx = tx.clone();
            let read_cancel = cancel.clone();
            let read_endpoint = endpoint.clone();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        _ = read_cancel.cancelled() => break,
                        frame = read_frame::<ServerFrame, _>(&mut read_half) => frame,
                    };
                    match frame {
                        Ok(Some(ServerFrame::Deliver { seq, body })) => {
                            let ack = ack_tx.clone();
                            let delivery = Delivery::new(Bytes::from(body), move || {
                                let _ = ack.send(seq);
                            });
                            if deliver_tx.send(delivery).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            info!(endpoint = %read_endpoint, "broker closed delivery stream");
                            break;
                        }
                        Err(e) => {
                            warn!(endpoint = %read_endpoint, error = %e, "delivery stream failed");
                            break;
                        }
                    }
                }
            });
        }

        // Reader tasks hold the only sender clones left; cancelling them
        // closes the subscription channel once buffered items drain.
        drop(tx);
        Ok(Subscription::new(rx, move || cancel.cancel()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn read_client_frame(stream: &mut TcpStream) -> Option<ClientFrame> {
        read_frame::<ClientFrame, _>(stream).await.unwrap()
    }

    #[tokio::test]
    async fn publish_sends_a_wire_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let publisher = SocketPublisher::new(addr.to_string());
        let publish = tokio::spawn(async move {
            publisher
                .publish("orders", Bytes::from_static(b"payload"))
                .await
        });

        let (mut server_side, _) = listener.accept().await.unwrap();
        match read_client_frame(&mut server_side).await {
            Some(ClientFrame::Publish { topic, body }) => {
                assert_eq!(topic, "orders");
                assert_eq!(body, b"payload");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        publish.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn subscribe_delivers_and_acks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            match read_client_frame(&mut stream).await {
                Some(ClientFrame::Subscribe { topic, channel }) => {
                    assert_eq!(topic, "orders");
                    assert_eq!(channel, "archive");
                }
                other => panic!("unexpected frame: {:?}", other),
            }

            write_frame(
                &mut stream,
                &ServerFrame::Deliver {
                    seq: 7,
                    body: b"payload".to_vec(),
                },
            )
            .await
            .unwrap();

            match read_client_frame(&mut stream).await {
                Some(ClientFrame::Ack { seq }) => assert_eq!(seq, 7),
                other => panic!("unexpected frame: {:?}", other),
            }
        });

        let subscriber = SocketSubscriber::new(vec![addr.to_string()]);
        let mut sub = subscriber.subscribe("orders", "archive").await.unwrap();

        let delivery = sub.recv().await.unwrap();
        assert_eq!(delivery.body().as_ref(), b"payload");
        delivery.ack();

        server.await.unwrap();
        sub.close();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_with_no_endpoints_fails() {
        let subscriber = SocketSubscriber::new(Vec::new());
        let err = subscriber.subscribe("orders", "archive").await.unwrap_err();
        assert!(matches!(err, BrokerError::NoEndpoints));
    }

    #[tokio::test]
    async fn publisher_reports_connection_refusal() {
        // Port 1 is essentially never listening.
        let publisher = SocketPublisher::new("127.0.0.1:1");
        let err = publisher
            .publish("orders", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Connect { .. }));
    }
}
