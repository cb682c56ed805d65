//! A client for driving CAN bus motor controllers
//!
//! The crate provides:
//!
//! - A [MotorController] session per device, which sends setpoints and keeps the device's
//!   configuration in sync with the session's desired configuration
//! - A [Bus] handle, shared between sessions, which carries the transport, the [BusRegistry] of
//!   claimed device numbers, and a [Clock]
//! - [commit_sync_group] for applying held outputs on several devices at once
//! - A [MotorConfig] TOML file format for storing a controller's setup
//! - A [MessageMux], which implements the session transport over any
//!   [`AsyncCanSender`](common::traits::AsyncCanSender) /
//!   [`AsyncCanReceiver`](common::traits::AsyncCanReceiver) pair using tokio tasks
//!
//! Sessions never block waiting for a response. The application's control loop is expected to
//! call [`MotorController::set`] (or [`MotorController::verify`]) and
//! [`MotorController::check_safety`] periodically.
#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod bus;
mod clock;
mod config;
mod control_mode;
mod error;
pub mod fields;
mod motor_controller;
mod mux;
pub mod safety;
mod status;
mod sync_group;

pub use lmcan_common as common;

pub use bus::{Bus, BusRegistry, DeviceAllocation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MotorConfig, SafetyConfig, SoftLimits};
pub use control_mode::{
    ControlMode, Faults, LimitMode, Limits, ModeTable, NeutralMode, PidIds, ReferenceSource,
    SetpointFormat, SourceMode, SourceSelection,
};
pub use error::MotorControllerError;
pub use fields::FieldId;
pub use motor_controller::{
    MotorController, DEFAULT_MAX_OUTPUT_VOLTAGE, MAX_FAULT_TIME, MIN_FAULT_TIME,
    RECEIVE_STATUS_ATTEMPTS, RECEIVE_STATUS_DELAY,
};
pub use mux::{MessageMux, TX_QUEUE_DEPTH};
pub use status::StatusSnapshot;
pub use sync_group::commit_sync_group;
