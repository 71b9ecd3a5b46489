//! Framed TCP transport boundary.
//!
//! The simulation core never touches sockets: it receives
//! [`TransportEvent`]s and hands finished encoded buffers to an
//! [`OutboundHandle`]. Frames are length prefixed (u32 little endian)
//! followed by the payload.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::MAX_FRAME_LEN;

/// Server-assigned identifier for one accepted connection.
pub type ConnectionId = u64;

/// Events surfaced to the simulation loop.
#[derive(Debug)]
pub enum TransportEvent {
    /// A client connected; packets for it go through the handle.
    Connected(ConnectionId, OutboundHandle),
    /// A complete inbound frame arrived.
    Message(ConnectionId, Vec<u8>),
    /// The connection closed or errored.
    Disconnected(ConnectionId),
}

/// Write half of a connection. Sends never block the tick: buffers are
/// queued onto the connection's writer task.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl OutboundHandle {
    /// Wrap a raw sender. Lets tests and in-process clients stand in for a
    /// socket-backed connection.
    pub fn from_sender(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { tx }
    }

    /// Queue one finished packet for delivery. Fails when the connection's
    /// writer task has shut down.
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| anyhow::anyhow!("connection writer closed"))
    }
}

/// Listening endpoint that fans all connection activity into one queue.
pub struct ServerEndpoint {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl ServerEndpoint {
    /// Bind a listener and spawn the accept loop.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().context("failed to query local addr")?;
        info!(%local_addr, "transport listening");

        let (events_tx, events) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, events_tx));

        Ok(Self { local_addr, events })
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Non-blocking poll for the next event; called between ticks.
    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    /// Await the next event (used by the stress client and tests).
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<TransportEvent>) {
    let mut next_id: ConnectionId = 1;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let id = next_id;
        next_id += 1;
        debug!(id, %peer, "client connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        if events
            .send(TransportEvent::Connected(id, OutboundHandle { tx: outbound_tx }))
            .is_err()
        {
            return; // endpoint dropped
        }
        tokio::spawn(serve_connection(id, stream, outbound_rx, events.clone()));
    }
}

async fn serve_connection(
    id: ConnectionId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let len = (frame.len() as u32).to_le_bytes();
            if writer.write_all(&len).await.is_err() || writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_FRAME_LEN {
            debug!(id, len, "dropping connection with oversized frame");
            break;
        }
        let mut frame = vec![0u8; len];
        if reader.read_exact(&mut frame).await.is_err() {
            break;
        }
        if events.send(TransportEvent::Message(id, frame)).is_err() {
            break;
        }
    }

    writer_task.abort();
    let _ = events.send(TransportEvent::Disconnected(id));
    debug!(id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip_through_the_endpoint() {
        let mut endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = endpoint.local_addr();

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let payload = vec![1u8, 2, 3, 4, 5];
        client
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await
            .unwrap();
        client.write_all(&payload).await.unwrap();

        let handle = match endpoint.next_event().await.unwrap() {
            TransportEvent::Connected(_, handle) => handle,
            other => panic!("expected Connected, got {other:?}"),
        };
        match endpoint.next_event().await.unwrap() {
            TransportEvent::Message(_, frame) => assert_eq!(frame, payload),
            other => panic!("expected Message, got {other:?}"),
        }

        handle.send(vec![9, 8, 7]).unwrap();
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        assert_eq!(u32::from_le_bytes(len_buf), 3);
        let mut out = [0u8; 3];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(out, [9, 8, 7]);
    }

    #[tokio::test]
    async fn oversized_frames_disconnect_the_client() {
        let mut endpoint = ServerEndpoint::bind("127.0.0.1:0".parse().unwrap())
            .await
            .expect("bind");
        let addr = endpoint.local_addr();

        let mut client = TcpStream::connect(addr).await.expect("connect");
        client
            .write_all(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes())
            .await
            .unwrap();

        // Connected then Disconnected, with no message in between.
        assert!(matches!(
            endpoint.next_event().await.unwrap(),
            TransportEvent::Connected(..)
        ));
        assert!(matches!(
            endpoint.next_event().await.unwrap(),
            TransportEvent::Disconnected(_)
        ));
    }
}
