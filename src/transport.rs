//! Transport seam between the SDO engine and the CAN bus.
//!
//! The engine never touches a socket or a CAN driver. It asks the
//! [`Transport`] whether a frame can be sent right now and hands it finished
//! frames; received frames are pushed back into the engine by the host
//! (see [`Bus::handle_frame`](crate::Bus::handle_frame)).
//!
//! [`MemoryTransport`] records every frame it is given. It backs the tests
//! and is handy for dry runs.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{CanFrame, MemoryTransport, Transport};
//!
//! let mut transport = MemoryTransport::new();
//! transport.send(&CanFrame::new(0x605, [0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0])).unwrap();
//! assert_eq!(transport.sent().len(), 1);
//!
//! transport.set_ready(false);
//! assert!(transport.send(&CanFrame::new(0x605, [0u8; 8])).is_err());
//! ```

use crate::error::{Result, SdoError};
use crate::frame::CanFrame;

/// Outbound side of a CAN bus.
pub trait Transport {
    /// Returns whether a frame can be queued for sending now.
    fn can_send(&self) -> bool;

    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::BusNotReady` when the bus cannot take the frame and
    /// `SdoError::Transport` for driver failures.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn can_send(&self) -> bool {
        (**self).can_send()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        (**self).send(frame)
    }
}

/// In-memory transport that records sent frames.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Vec<CanFrame>,
    blocked: bool,
}

impl MemoryTransport {
    /// Creates a ready transport with no recorded frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens or closes the send gate.
    pub fn set_ready(&mut self, ready: bool) {
        self.blocked = !ready;
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    /// Most recently sent frame.
    pub fn last(&self) -> Option<&CanFrame> {
        self.sent.last()
    }

    /// Removes and returns every recorded frame.
    pub fn take_sent(&mut self) -> Vec<CanFrame> {
        std::mem::take(&mut self.sent)
    }

    /// Forgets every recorded frame.
    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Transport for MemoryTransport {
    fn can_send(&self) -> bool {
        !self.blocked
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if self.blocked {
            return Err(SdoError::BusNotReady);
        }
        self.sent.push(frame.clone());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("sent", &self.sent.len())
            .field("ready", &!self.blocked)
            .finish()
    }
}
