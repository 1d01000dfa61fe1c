// ABOUTME: Owns the single transport and the lazily created SFTP sub-client.
// ABOUTME: Guards SFTP initialization and tears both handles down in order.

use super::error::{Error, Result};
use super::transport::{FileTransfer, Transport};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Transport plus optional SFTP sub-client, exclusively owned by one `RemoteClient`.
#[derive(Default)]
pub struct Connection {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    // Held across the sub-client handshake so concurrent first transfers
    // create exactly one. Lock order: file_transfer before transport.
    file_transfer: Mutex<Option<Arc<dyn FileTransfer>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &"<dyn Transport>")
            .field("file_transfer", &"<dyn FileTransfer>")
            .finish()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a transport is held and the server has not dropped it.
    pub async fn is_connected(&self) -> bool {
        self.transport
            .read()
            .await
            .as_ref()
            .is_some_and(|transport| !transport.is_closed())
    }

    pub async fn has_file_transfer(&self) -> bool {
        self.file_transfer.lock().await.is_some()
    }

    /// Install the transport returned by `dial` unless a live one is already
    /// held. A transport the server closed is discarded first, together with
    /// its SFTP sub-client. Returns whether `dial` ran.
    pub(crate) async fn connect_with<F, Fut>(&self, dial: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn Transport>>>,
    {
        let mut file_transfer = self.file_transfer.lock().await;
        let mut transport = self.transport.write().await;
        let stale = match transport.as_ref() {
            Some(existing) if !existing.is_closed() => return Ok(false),
            Some(_) => true,
            None => false,
        };
        if stale {
            tracing::warn!("transport was closed by the server, dialing again");
            transport.take();
            file_transfer.take();
        }
        drop(file_transfer);

        *transport = Some(dial().await?);
        Ok(true)
    }

    pub(crate) async fn transport(&self) -> Result<Arc<dyn Transport>> {
        match self.transport.read().await.as_ref() {
            Some(transport) if !transport.is_closed() => Ok(Arc::clone(transport)),
            _ => Err(Error::NotConnected),
        }
    }

    /// Return the SFTP sub-client, creating it on first use.
    pub(crate) async fn file_transfer(&self) -> Result<Arc<dyn FileTransfer>> {
        let mut slot = self.file_transfer.lock().await;
        let transport = self.transport().await?;
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let created = transport.open_file_transfer().await?;
        tracing::debug!("started SFTP sub-client");
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    /// Release the SFTP sub-client, then the transport. Both slots end up empty
    /// even when a release fails; the transport's error is returned.
    pub async fn close(&self) -> Result<()> {
        let mut file_transfer = self.file_transfer.lock().await;
        let mut slot = self.transport.write().await;
        let live = slot.as_ref().is_some_and(|t| !t.is_closed());

        if let Some(sftp) = file_transfer.take() {
            if live {
                if let Err(e) = sftp.close().await {
                    tracing::warn!("failed to close SFTP sub-client: {}", e);
                }
            }
        }
        let transport = slot.take();
        drop(slot);
        drop(file_transfer);

        match transport {
            Some(transport) if live => transport.close().await,
            Some(_) => {
                tracing::debug!("transport already closed by the server");
                Ok(())
            }
            None => Ok(()),
        }
    }
}
