// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! TCP socket transport.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::info;

use dc_core::transport::TransportFuture;
use dc_core::{ConnectionId, Transport, TransportEvents};

use crate::link::StreamLink;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SocketTransport {
    id: ConnectionId,
    host: String,
    port: u16,
    link: StreamLink,
}

impl SocketTransport {
    pub fn new(host: &str, port: u16, events: TransportEvents) -> Self {
        let id = ConnectionId::Socket {
            host: host.to_string(),
            port,
        };
        Self {
            link: StreamLink::new(id.to_string(), events),
            id,
            host: host.to_string(),
            port,
        }
    }
}

impl Transport for SocketTransport {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn connect<'a>(&'a mut self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let addr = format!("{}:{}", self.host, self.port);
            let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
                .await
                .map_err(|_| format!("connect to {} timed out", addr))??;
            stream.set_nodelay(true)?;
            info!("Connected to {}", addr);
            let (reader, writer) = stream.into_split();
            self.link.attach(reader, writer);
            Ok(())
        })
    }

    fn write<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move { self.link.write(payload).await })
    }

    fn disconnect<'a>(&'a mut self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.link.close().await;
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::TransportEvent;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_socket_round_trip_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = SocketTransport::new("127.0.0.1", port, tx);

        transport.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));

        transport.write(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Data(b"pong".to_vec())));

        drop(peer);
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
        assert!(!transport.is_connected());
        assert!(transport.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = SocketTransport::new("127.0.0.1", port, tx);
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }
}
