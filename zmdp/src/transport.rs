//! Transport layer - DEALER socket behind an I/O pump task

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use zeromq::{Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::protocol::Frames;
use crate::{Error, Result};

/// Transport trait for abstracting the broker connection
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one multipart message
    async fn send(&self, frames: Frames) -> Result<()>;

    /// Receive one multipart message
    async fn recv(&self) -> Result<Frames>;

    /// Close the transport
    async fn close(&self) -> Result<()>;
}

/// ZeroMQ DEALER transport.
///
/// The socket is owned by a spawned pump task; callers talk to it through
/// bounded channels, so a send never waits behind an in-progress receive.
pub struct ZmqTransport {
    outbound: mpsc::Sender<Frames>,
    inbound: Mutex<mpsc::Receiver<Frames>>,
    pump: tokio::task::JoinHandle<()>,
}

impl ZmqTransport {
    /// Connect a DEALER socket to the broker endpoint.
    ///
    /// Connection failures are fatal to this transport instance; there is no
    /// retry policy at this layer.
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let mut socket = zeromq::DealerSocket::new();
        socket.connect(endpoint).await.map_err(|e| {
            Error::connection(format!("failed to connect DEALER socket to {endpoint}"), e)
        })?;
        tracing::info!(endpoint, "DEALER socket connected");

        let (out_tx, out_rx) = mpsc::channel::<Frames>(256);
        let (in_tx, in_rx) = mpsc::channel::<Frames>(256);
        let pump = tokio::spawn(pump_loop(socket, out_rx, in_tx));

        Ok(Self {
            outbound: out_tx,
            inbound: Mutex::new(in_rx),
            pump,
        })
    }
}

async fn pump_loop(
    mut socket: zeromq::DealerSocket,
    mut outbound: mpsc::Receiver<Frames>,
    inbound: mpsc::Sender<Frames>,
) {
    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                let Some(frames) = outgoing else { break };
                let Some(msg) = to_zmq_message(frames) else {
                    tracing::warn!("refusing to send message with no frames");
                    continue;
                };
                if let Err(e) = socket.send(msg).await {
                    tracing::error!(error = %e, "DEALER send failed; closing pump");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Ok(msg) => {
                        if inbound.send(msg.into_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "DEALER recv failed; closing pump");
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("transport pump stopped");
}

fn to_zmq_message(frames: Frames) -> Option<ZmqMessage> {
    let mut frames = frames.into_iter();
    let mut msg = ZmqMessage::from(frames.next()?.to_vec());
    for frame in frames {
        msg.push_back(frame);
    }
    Some(msg)
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn send(&self, frames: Frames) -> Result<()> {
        self.outbound.send(frames).await.map_err(|_| {
            Error::transport_msg("socket pump closed; connection lost")
        })
    }

    async fn recv(&self) -> Result<Frames> {
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| Error::transport_msg("socket pump closed; connection lost"))
    }

    async fn close(&self) -> Result<()> {
        self.pump.abort();
        Ok(())
    }
}

/// Mock transport for testing: tests hold the wire-facing ends and play broker.
#[cfg(test)]
pub struct MockTransport {
    tx: mpsc::Sender<Frames>,
    rx: Mutex<mpsc::Receiver<Frames>>,
}

/// The broker side of a [`MockTransport`] pair.
#[cfg(test)]
pub struct MockWire {
    /// Messages the client sent, in send order.
    pub sent: mpsc::Receiver<Frames>,
    /// Inject a broker message into the client's receive path.
    pub inject: mpsc::Sender<Frames>,
}

#[cfg(test)]
impl MockTransport {
    pub fn pair() -> (Self, MockWire) {
        let (tx1, rx1) = mpsc::channel(1024);
        let (tx2, rx2) = mpsc::channel(1024);
        (
            Self {
                tx: tx1,
                rx: Mutex::new(rx2),
            },
            MockWire {
                sent: rx1,
                inject: tx2,
            },
        )
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frames: Frames) -> Result<()> {
        self.tx
            .send(frames)
            .await
            .map_err(|_| Error::transport_msg("mock transport send failed"))
    }

    async fn recv(&self) -> Result<Frames> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| Error::transport_msg("mock transport closed"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
