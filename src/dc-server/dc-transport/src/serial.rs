// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Serial port transport.

use tokio_serial::SerialPortBuilderExt;
use tracing::info;

use dc_core::transport::TransportFuture;
use dc_core::{ConnectionId, Transport, TransportEvents};

use crate::link::StreamLink;

pub struct SerialTransport {
    id: ConnectionId,
    path: String,
    baud: u32,
    link: StreamLink,
}

impl SerialTransport {
    pub fn new(path: &str, baud: u32, events: TransportEvents) -> Self {
        let id = ConnectionId::Serial {
            path: path.to_string(),
        };
        Self {
            link: StreamLink::new(id.to_string(), events),
            id,
            path: path.to_string(),
            baud,
        }
    }
}

impl Transport for SerialTransport {
    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn connect<'a>(&'a mut self) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let port = tokio_serial::new(&self.path, self.baud).open_native_async()?;
            info!("Opened {} @ {} baud", self.path, self.baud);
            let (reader, writer) = tokio::io::split(port);
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
