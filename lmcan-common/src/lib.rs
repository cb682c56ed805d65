//! Common functionality shared among other lmcan crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is re-exported by
//! `lmcan-client`.
//!
//! - [messages] holds the raw CAN frame types
//! - [api] builds and parses the 29-bit message identifiers used by the motor controller firmware
//! - [codec] packs and unpacks the fixed-point payload formats
//! - [traits] defines the transport interfaces the client is written against
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod api;
pub mod codec;
pub mod constants;
pub mod device_number;
pub mod messages;
pub mod traits;

pub use device_number::DeviceNumber;

pub use messages::{CanError, CanId, CanMessage};
