use std::sync::Arc;

use lmcan_client::MessageMux;
use lmcan_common::{
    api::FULL_MESSAGE_MASK,
    messages::{CanError, CanId, CanMessage},
    traits::{AsyncCanReceiver, AsyncCanSender, CanSendError},
};
use snafu::{ResultExt, Snafu};

use socketcan::{
    tokio::CanSocket, CanFilter, CanFrame, EmbeddedFrame, Frame, IoError, ShouldRetry,
    SocketOptions,
};

fn socketcan_id_to_lmcan_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn lmcan_id_to_socketcan_id(id: CanId) -> Option<socketcan::CanId> {
    match id {
        CanId::Extended(id) => {
            socketcan::ExtendedId::new(id & FULL_MESSAGE_MASK).map(socketcan::CanId::from)
        }
        CanId::Std(id) => socketcan::StandardId::new(id).map(socketcan::CanId::from),
    }
}

fn socketcan_frame_to_lmcan_message(frame: CanFrame) -> Result<CanMessage, CanError> {
    let id = socketcan_id_to_lmcan_id(frame.can_id());

    match frame {
        CanFrame::Data(frame) => Ok(CanMessage::new(id, frame.data())),
        CanFrame::Remote(_) => Ok(CanMessage::new_rtr(id)),
        CanFrame::Error(frame) => Err(CanError::from_raw(frame.error_bits() as u8)),
    }
}

fn lmcan_message_to_socketcan_frame(msg: CanMessage) -> Option<CanFrame> {
    let id = lmcan_id_to_socketcan_id(msg.id())?;

    if msg.is_rtr() {
        CanFrame::new_remote(id, 0)
    } else {
        CanFrame::new(id, msg.data())
    }
}

/// An acceptance filter for a socketcan interface
///
/// A frame is accepted when `frame_id & mask == id & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketCanFilter {
    id: u32,
    mask: u32,
}

impl SocketCanFilter {
    /// Create a filter
    pub fn new(id: u32, mask: u32) -> Self {
        Self { id, mask }
    }
}

/// Receiving half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanReceiver {
    socket: Arc<CanSocket>,
}

/// Error returned by [`SocketCanReceiver`]
#[derive(Debug, Snafu)]
pub enum ReceiveError {
    /// The socket failed
    #[snafu(display("Socket error: {source}"))]
    Io {
        /// The underlying error
        source: IoError,
    },
    /// The interface delivered an error frame
    #[snafu(display("{source}"))]
    Can {
        /// The decoded error frame
        source: CanError,
    },
}

impl AsyncCanReceiver for SocketCanReceiver {
    type Error = ReceiveError;

    /// The tokio socket only supports awaiting frames, so this never returns a frame
    fn try_recv(&mut self) -> Result<Option<CanMessage>, ReceiveError> {
        Ok(None)
    }

    async fn recv(&mut self) -> Result<CanMessage, ReceiveError> {
        loop {
            match self.socket.read_frame().await {
                Ok(frame) => return socketcan_frame_to_lmcan_message(frame).context(CanSnafu),
                Err(e) => {
                    if !e.should_retry() {
                        return Err(ReceiveError::Io { source: e });
                    }
                }
            }
        }
    }
}

/// Sending half of a socketcan interface
#[derive(Debug, Clone)]
pub struct SocketCanSender {
    socket: Arc<CanSocket>,
}

impl AsyncCanSender for SocketCanSender {
    async fn send(&mut self, msg: CanMessage) -> Result<(), CanSendError> {
        let Some(frame) = lmcan_message_to_socketcan_frame(msg) else {
            return Err(CanSendError(msg));
        };
        self.socket
            .write_frame(frame)
            .await
            .map_err(|_| CanSendError(msg))
    }
}

/// Open a socketcan device and split it into a sender and a receiver
///
/// # Arguments
/// * `device` - The name of the socketcan device to open, e.g. "vcan0", or "can0"
/// * `filters` - Optional acceptance filters to install on the socket
///
/// Both halves share one socket, so the receiver does not see frames sent by the sender.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan<S: AsRef<str>>(
    device: S,
    filters: Option<&[SocketCanFilter]>,
) -> Result<(SocketCanSender, SocketCanReceiver), IoError> {
    let device: &str = device.as_ref();
    let socket = CanSocket::open(device)?;
    if let Some(filters) = filters {
        let filters: Vec<CanFilter> = filters
            .iter()
            .map(|filter| CanFilter::new(filter.id, filter.mask))
            .collect();
        socket.set_filters(&filters)?;
    }
    let socket = Arc::new(socket);
    let receiver = SocketCanReceiver {
        socket: socket.clone(),
    };
    let sender = SocketCanSender { socket };
    log::info!("Opened socketcan interface {device}");
    Ok((sender, receiver))
}

/// Open a socketcan device and wrap it in a [`MessageMux`] for use by motor controller sessions
///
/// Must be called from within a tokio runtime.
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub fn open_socketcan_mux<S: AsRef<str>>(device: S) -> Result<MessageMux, IoError> {
    let (sender, receiver) = open_socketcan(device, None)?;
    Ok(MessageMux::new(sender, receiver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_conversion() {
        let id = lmcan_id_to_socketcan_id(CanId::extended(0x0202_1405)).unwrap();
        assert_eq!(CanId::extended(0x0202_1405), socketcan_id_to_lmcan_id(id));
        let id = lmcan_id_to_socketcan_id(CanId::std(0x123)).unwrap();
        assert_eq!(CanId::std(0x123), socketcan_id_to_lmcan_id(id));
        assert!(lmcan_id_to_socketcan_id(CanId::std(0x800)).is_none());
    }

    #[test]
    fn test_frame_conversion() {
        let msg = CanMessage::new(CanId::extended(0x0202_0145), &[0, 0, 0x00, 0x40]);
        let frame = lmcan_message_to_socketcan_frame(msg).unwrap();
        assert_eq!(msg, socketcan_frame_to_lmcan_message(frame).unwrap());

        let request = CanMessage::new_rtr(CanId::extended(0x205));
        let frame = lmcan_message_to_socketcan_frame(request).unwrap();
        let back = socketcan_frame_to_lmcan_message(frame).unwrap();
        assert!(back.is_rtr());
        assert_eq!(CanId::extended(0x205), back.id());
    }
}
