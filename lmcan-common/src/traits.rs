//! Transport traits
//!
//! Two layers are defined here. [`AsyncCanSender`] and [`AsyncCanReceiver`] move raw frames to and
//! from a CAN interface. [`CanSessionMux`] is the message level interface the motor controller
//! session is written against: addressed sends with an optional repeat period, and non-blocking
//! reads of the latest message received for an identifier.

use std::error;

use snafu::Snafu;

use crate::messages::{CanError, CanMessage, MAX_DATA_LENGTH};

/// Error type for CAN send operations containing the failed message
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct CanSendError(pub CanMessage);

impl core::fmt::Display for CanSendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Failed to send CAN message: {:?}", self.0)
    }
}

impl error::Error for CanSendError {}

/// An async CAN sender trait
pub trait AsyncCanSender: Send {
    /// Send a message to the bus
    fn send(
        &mut self,
        msg: CanMessage,
    ) -> impl core::future::Future<Output = Result<(), CanSendError>> + Send;
}

/// An async CAN receiver trait
pub trait AsyncCanReceiver: Send {
    /// The error type returned by recv
    type Error: error::Error + Send + 'static;

    /// Receive available message immediately
    fn try_recv(&mut self) -> Result<Option<CanMessage>, Self::Error>;

    /// A blocking receive
    fn recv(
        &mut self,
    ) -> impl core::future::Future<Output = Result<CanMessage, Self::Error>> + Send;

    /// Remove any pending messages from the receiver
    fn flush(&mut self) -> Result<(), Self::Error> {
        while self.try_recv()?.is_some() {}
        Ok(())
    }
}

/// How a message should be repeated by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendPeriod {
    /// Send once
    NoRepeat,
    /// Cancel any periodic transmission of this identifier
    ///
    /// No message is put on the bus.
    StopRepeating,
    /// Send now, then again every N milliseconds until cancelled
    Every(u32),
}

impl SendPeriod {
    /// The raw wire sentinel value: 0 for no repeat, -1 to stop, otherwise the period in ms
    pub fn as_raw(&self) -> i32 {
        match self {
            SendPeriod::NoRepeat => 0,
            SendPeriod::StopRepeating => -1,
            SendPeriod::Every(ms) => (*ms).min(i32::MAX as u32) as i32,
        }
    }

    /// Interpret a raw period value
    ///
    /// Negative values cancel, zero sends once.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => SendPeriod::NoRepeat,
            r if r < 0 => SendPeriod::StopRepeating,
            r => SendPeriod::Every(r as u32),
        }
    }
}

/// A message read back from a [`CanSessionMux`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// The full identifier of the message, as received
    pub id: u32,
    /// Payload buffer; only the first `dlc` bytes are valid
    pub data: [u8; MAX_DATA_LENGTH],
    /// Number of valid bytes in `data`
    pub dlc: u8,
    /// Receive time, in milliseconds on the transport's clock
    pub timestamp_ms: u64,
}

impl ReceivedMessage {
    /// Create a received message
    ///
    /// Data beyond 8 bytes is discarded.
    pub fn new(id: u32, data: &[u8], timestamp_ms: u64) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0; MAX_DATA_LENGTH];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            data: buf,
            dlc: dlc as u8,
            timestamp_ms,
        }
    }

    /// The valid portion of the payload
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// Transport level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum BusError {
    /// The interface refused a frame
    #[snafu(display("Failed to transmit message {id:#010x}"))]
    TxFailed {
        /// Identifier of the message that failed
        id: u32,
    },
    /// The transmit queue is full
    #[snafu(display("Transmit queue full"))]
    TxQueueFull,
    /// The transport has shut down
    #[snafu(display("Transport closed"))]
    Closed,
    /// The CAN controller reported an error
    #[snafu(display("CAN error: {source}"))]
    Can {
        /// The underlying error
        source: CanError,
    },
    /// More than 8 bytes were passed for a single message
    #[snafu(display("Payload of {len} bytes is too large"))]
    PayloadTooLarge {
        /// Length of the rejected payload
        len: usize,
    },
}

/// The message level transport used by a motor controller session
///
/// Identifiers are the 29-bit extended message id, optionally with
/// [`REMOTE_FRAME`](crate::api::REMOTE_FRAME) set to send a request frame with no payload.
///
/// Implementations must tolerate concurrent sends from multiple sessions. Reads for a particular
/// id are only expected from one session at a time.
pub trait CanSessionMux: Send + Sync {
    /// Transmit a message
    ///
    /// With [`SendPeriod::Every`], the message is sent immediately and then repeated until a
    /// send of the same id with [`SendPeriod::StopRepeating`] is made. A new periodic send for an
    /// id replaces the previous one.
    fn send_message(&self, id: u32, data: &[u8], period: SendPeriod) -> Result<(), BusError>;

    /// Read the latest message whose identifier matches `id` in the bits selected by `mask`
    ///
    /// Returns `Ok(None)` when nothing has arrived. A message is returned at most once; after it
    /// is read it is removed until the device sends it again.
    fn receive_message(&self, id: u32, mask: u32) -> Result<Option<ReceivedMessage>, BusError>;
}

impl<T: CanSessionMux + ?Sized> CanSessionMux for std::sync::Arc<T> {
    fn send_message(&self, id: u32, data: &[u8], period: SendPeriod) -> Result<(), BusError> {
        (**self).send_message(id, data, period)
    }

    fn receive_message(&self, id: u32, mask: u32) -> Result<Option<ReceivedMessage>, BusError> {
        (**self).receive_message(id, mask)
    }
}
