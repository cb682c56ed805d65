//! Utilities for connecting lmcan sessions to real CAN interfaces
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use self::socketcan::{
    open_socketcan, open_socketcan_mux, ReceiveError, SocketCanFilter, SocketCanReceiver,
    SocketCanSender,
};
