// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Byte stream plumbing shared by the serial and socket transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dc_core::{DynResult, TransportEvent, TransportEvents};

const READ_BUF_SIZE: usize = 1024;

struct Link {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    reader: JoinHandle<()>,
}

/// Write half plus a background reader forwarding into the event channel.
pub(crate) struct StreamLink {
    label: String,
    events: TransportEvents,
    connected: Arc<AtomicBool>,
    link: Option<Link>,
}

impl StreamLink {
    pub(crate) fn new(label: String, events: TransportEvents) -> Self {
        Self {
            label,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            link: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Take over an opened stream and announce the connection.
    pub(crate) fn attach<R, W>(&mut self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        if let Some(old) = self.link.take() {
            old.reader.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
        let reader = spawn_reader(
            reader,
            self.label.clone(),
            self.events.clone(),
            self.connected.clone(),
        );
        self.link = Some(Link {
            writer: Box::new(writer),
            reader,
        });
        let _ = self.events.send(TransportEvent::Connected);
    }

    pub(crate) async fn write(&mut self, payload: &[u8]) -> DynResult<()> {
        if !self.is_connected() {
            return Err(format!("{} is not connected", self.label).into());
        }
        let Some(link) = self.link.as_mut() else {
            return Err(format!("{} is not connected", self.label).into());
        };
        let result = async {
            link.writer.write_all(payload).await?;
            link.writer.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("{} write failed: {}", self.label, e);
            self.close().await;
            let _ = self.events.send(TransportEvent::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut link) = self.link.take() {
            link.reader.abort();
            if let Err(e) = link.writer.shutdown().await {
                debug!("{} shutdown: {}", self.label, e);
            }
        }
    }
}

impl Drop for StreamLink {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
        }
    }
}

fn spawn_reader<R>(
    mut reader: R,
    label: String,
    events: TransportEvents,
    connected: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("{} closed by peer", label);
                    connected.store(false, Ordering::SeqCst);
                    break;
                }
                Ok(n) => {
                    debug!("{} <- {}", label, hex::encode(&buf[..n]));
                    if events.send(TransportEvent::Data(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("{} read failed: {}", label, e);
                    connected.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }
        let _ = events.send(TransportEvent::Disconnected);
    })
}
