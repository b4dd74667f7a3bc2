//! Scoped transport ownership

use std::ops::{Deref, DerefMut};

use super::Transport;
use crate::error::Result;

/// Open transport that is closed exactly once
///
/// The guard closes the transport on [`TransportGuard::close`] or, failing
/// that, when it goes out of scope. Errors from the implicit close on drop
/// are logged and otherwise ignored.
pub struct TransportGuard<T: Transport> {
    transport: T,
    closed: bool,
}

impl<T: Transport> TransportGuard<T> {
    /// Open `transport` and take ownership of it
    ///
    /// If opening fails the transport is dropped without being closed.
    pub fn open(mut transport: T) -> Result<Self> {
        transport.open()?;
        Ok(Self {
            transport,
            closed: false,
        })
    }

    /// Close the transport now
    ///
    /// Later calls (and the drop) are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }

    /// Whether the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<T: Transport> Deref for TransportGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> DerefMut for TransportGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: Transport> Drop for TransportGuard<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close transport: {}", e);
        }
    }
}
