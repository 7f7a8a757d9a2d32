// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Loopback transport for development and testing.
//!
//! Every write is echoed back as received data. No hardware required.

use tracing::debug;

use dc_core::transport::TransportFuture;
use dc_core::{ConnectionId, Transport, TransportEvent, TransportEvents};

pub struct LoopbackTransport {
    id: ConnectionId,
    events: TransportEvents,
    connected: bool,
}

impl LoopbackTransport {
    pub fn new(name: &str, events: TransportEvents) -> Self {
        Self {
            id: ConnectionId::Loopback {
                name: name.to_string(),
            },
            events,
            connected: false,
        }
    }
}

impl Transport for LoopbackTransport {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn connect<'a>(&'a mut self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.connected = true;
            let _ = self.events.send(TransportEvent::Connected);
            Ok(())
        })
    }

    fn write<'a>(&'a mut self, payload: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if !self.connected {
                return Err(format!("{} is not connected", self.id).into());
            }
            debug!("{} echo {} bytes", self.id, payload.len());
            let _ = self.events.send(TransportEvent::Data(payload.to_vec()));
            Ok(())
        })
    }

    fn disconnect<'a>(&'a mut self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            if self.connected {
                self.connected = false;
                let _ = self.events.send(TransportEvent::Disconnected);
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_echo_and_lifecycle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = LoopbackTransport::new("bench", tx);

        assert!(transport.write(b"early").await.is_err());
        transport.connect().await.unwrap();
        transport.write(&[0x01, 0x03]).await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
        assert_eq!(rx.recv().await, Some(TransportEvent::Data(vec![0x01, 0x03])));
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected));
        assert!(!transport.is_connected());
    }
}
