//! A session with one motor controller on the bus
use std::time::Duration;

use lmcan_common::{
    api::{self, MessageId, FULL_MESSAGE_MASK},
    codec::{self, Payload},
    constants::{firmware_supported, status_items, CONTROLLER_RATE_HZ, SEND_MESSAGE_PERIOD_MS},
    traits::{CanSessionMux, ReceivedMessage, SendPeriod},
    DeviceNumber,
};

use crate::{
    bus::{Bus, DeviceAllocation},
    control_mode::{
        ControlMode, Faults, LimitMode, Limits, NeutralMode, ReferenceSource, SourceMode,
    },
    error::{
        DeviceNotRespondingSnafu, FirmwareVersionSnafu, InvalidOperationSnafu,
        MotorControllerError,
    },
    fields::{FieldId, UnverifiedFields},
    safety::SafetyWatchdog,
    status::StatusSnapshot,
};

/// Number of times to poll for the initial status messages when opening a session
pub const RECEIVE_STATUS_ATTEMPTS: usize = 50;
/// Delay between polls when opening a session
pub const RECEIVE_STATUS_DELAY: Duration = Duration::from_millis(1);

/// Default maximum output voltage, the nominal bus voltage
pub const DEFAULT_MAX_OUTPUT_VOLTAGE: f64 = 12.0;
/// Lowest fault time accepted by the device, in seconds
pub const MIN_FAULT_TIME: f64 = 0.5;
/// Highest fault time accepted by the device, in seconds
pub const MAX_FAULT_TIME: f64 = 3.0;

/// Configuration APIs whose stale responses are discarded after a power cycle
const CONFIG_APIS: [MessageId; 22] = [
    api::status::CONTROL_MODE,
    api::speed::REFERENCE,
    api::position::REFERENCE,
    api::speed::P,
    api::position::P,
    api::current::P,
    api::speed::I,
    api::position::I,
    api::current::I,
    api::speed::D,
    api::position::D,
    api::current::D,
    api::config::ENCODER_LINES,
    api::config::POT_TURNS,
    api::config::BRAKE_COAST,
    api::config::LIMIT_MODE,
    api::config::LIMIT_FORWARD,
    api::config::LIMIT_REVERSE,
    api::config::MAX_OUTPUT_VOLTAGE,
    api::voltage::SET_RAMP,
    api::voltage_comp::COMP_RAMP,
    api::config::FAULT_TIME,
];

type Result<T> = core::result::Result<T, MotorControllerError>;

/// A session with a single motor controller
///
/// The session holds the desired configuration of the device. Setters transmit immediately and
/// mark the value unverified; [`verify`](Self::verify) (called on every [`set`](Self::set)) polls
/// the device and resends anything which does not match, until every value is confirmed. This
/// also restores the configuration after the device has been power cycled.
///
/// Nothing in the session blocks waiting for a response, except [`open`](Self::open), which polls
/// for a bounded time for the device to appear.
///
/// Dropping the session disables the motor, cancels periodic transmissions, and frees the device
/// number.
#[derive(Debug)]
pub struct MotorController<M: CanSessionMux> {
    bus: Bus<M>,
    allocation: DeviceAllocation,
    control_mode: ControlMode,
    control_enabled: bool,
    stopped: bool,
    inverted: bool,
    value: f64,
    firmware_version: u32,
    hardware_version: u8,

    speed_reference: ReferenceSource,
    position_reference: ReferenceSource,
    p: f64,
    i: f64,
    d: f64,
    neutral_mode: NeutralMode,
    encoder_codes_per_rev: u16,
    potentiometer_turns: u16,
    limit_mode: LimitMode,
    forward_limit: f64,
    reverse_limit: f64,
    max_output_voltage: f64,
    voltage_ramp_rate: f64,
    fault_time: f64,

    unverified: UnverifiedFields,
    status: StatusSnapshot,
    watchdog: SafetyWatchdog,
}

impl<M: CanSessionMux> MotorController<M> {
    /// Open a session with the controller at `device_number`
    ///
    /// Claims the device number on the bus, then polls until the device has reported its firmware
    /// version and all three periodic status messages.
    ///
    /// # Errors
    ///
    /// - [`MotorControllerError::Allocation`] if another session owns the device number
    /// - [`MotorControllerError::DeviceNotResponding`] if the device does not answer in time
    ///
    /// A device with unsupported firmware is opened, but refuses control; see
    /// [`MotorControllerError::FirmwareVersion`].
    ///
    /// Polling sleeps on the bus clock. With a [`MessageMux`](crate::MessageMux) this must not be
    /// called from the runtime thread which drives the mux tasks.
    pub fn open(bus: &Bus<M>, device_number: DeviceNumber) -> Result<Self> {
        let allocation = bus.registry().allocate(device_number)?;
        let now = bus.clock().now();

        let mut controller = Self {
            bus: bus.clone(),
            allocation,
            control_mode: ControlMode::PercentVoltage,
            control_enabled: true,
            stopped: false,
            inverted: false,
            value: 0.0,
            firmware_version: 0,
            hardware_version: 0,
            speed_reference: ReferenceSource::None,
            position_reference: ReferenceSource::None,
            p: 0.0,
            i: 0.0,
            d: 0.0,
            neutral_mode: NeutralMode::Jumper,
            encoder_codes_per_rev: 0,
            potentiometer_turns: 0,
            limit_mode: LimitMode::SwitchInputsOnly,
            forward_limit: 0.0,
            reverse_limit: 0.0,
            max_output_voltage: DEFAULT_MAX_OUTPUT_VOLTAGE,
            voltage_ramp_rate: 0.0,
            fault_time: 0.0,
            unverified: UnverifiedFields::new(),
            status: StatusSnapshot::new(),
            watchdog: SafetyWatchdog::new(now),
        };

        controller.request(api::FIRMWARE_VERSION.remote())?;
        controller.request(api::HARDWARE_VERSION)?;
        controller.send(
            api::status::POWER,
            &[],
            SendPeriod::Every(SEND_MESSAGE_PERIOD_MS),
        )?;

        let mut firmware_version = None;
        for _ in 0..RECEIVE_STATUS_ATTEMPTS {
            controller.bus.clock().sleep(RECEIVE_STATUS_DELAY);
            controller.setup_periodic_status()?;
            controller.update_periodic_status()?;

            if firmware_version.is_none() {
                match controller.receive(api::FIRMWARE_VERSION)? {
                    Some(msg) => match codec::unpack_i32(msg.data()) {
                        Ok(version) => firmware_version = Some(version as u32),
                        Err(e) => {
                            log::debug!(
                                "Device {device_number} sent malformed firmware version ({e}), requesting again"
                            );
                            controller.request(api::FIRMWARE_VERSION.remote())?;
                        }
                    },
                    None => controller.request(api::FIRMWARE_VERSION.remote())?,
                }
            }

            if firmware_version.is_some() && controller.status.all_received() {
                break;
            }
        }

        let Some(firmware_version) = firmware_version.filter(|_| controller.status.all_received())
        else {
            log::error!(
                "Motor controller {device_number} did not respond after {RECEIVE_STATUS_ATTEMPTS} attempts"
            );
            // Dropping the controller tears down periodics and frees the device number
            return DeviceNotRespondingSnafu {
                device_number: device_number.raw(),
            }
            .fail();
        };
        controller.firmware_version = firmware_version;

        controller.hardware_version = match controller.receive(api::HARDWARE_VERSION)? {
            Some(msg) => msg.data().first().copied().unwrap_or(0),
            None => 0,
        };

        if !firmware_supported(firmware_version) {
            log::error!(
                "Motor controller {device_number} firmware {firmware_version} is not supported; control refused"
            );
            controller.control_enabled = false;
        } else {
            log::info!(
                "Opened motor controller {device_number}: firmware {firmware_version}, hardware {}",
                controller.hardware_version
            );
        }

        Ok(controller)
    }

    /// The device number of this controller
    pub fn device_number(&self) -> DeviceNumber {
        self.allocation.device_number()
    }

    /// A short description of the device
    pub fn description(&self) -> String {
        format!("Motor controller {}", self.device_number())
    }

    /// Firmware version reported by the device
    pub fn firmware_version(&self) -> u32 {
        self.firmware_version
    }

    /// Hardware version reported by the device, or 0 if it did not report one
    pub fn hardware_version(&self) -> u8 {
        self.hardware_version
    }

    /// Returns true if the firmware is in the supported range
    pub fn firmware_supported(&self) -> bool {
        firmware_supported(self.firmware_version)
    }

    fn ensure_control_allowed(&self) -> Result<()> {
        if self.firmware_supported() {
            Ok(())
        } else {
            FirmwareVersionSnafu {
                device_number: self.device_number().raw(),
                version: self.firmware_version,
            }
            .fail()
        }
    }

    fn send(&self, api: MessageId, data: &[u8], period: SendPeriod) -> Result<()> {
        let id = api.with_device(self.device_number());
        let payload = api::frame_payload(id, data)?;
        self.bus
            .mux()
            .send_message(id.raw(), payload.as_slice(), period)?;
        Ok(())
    }

    fn request(&self, api: MessageId) -> Result<()> {
        log::trace!(
            "Requesting {:#010x} from device {}",
            api.raw(),
            self.device_number()
        );
        self.send(api, &[], SendPeriod::NoRepeat)
    }

    fn receive(&self, api: MessageId) -> Result<Option<ReceivedMessage>> {
        let id = api.with_device(self.device_number());
        Ok(self
            .bus
            .mux()
            .receive_message(id.wire_id(), FULL_MESSAGE_MASK)?)
    }

    /// Command a new output
    ///
    /// The value is in the units of the active control mode. The setpoint is retransmitted by the
    /// transport every 20 ms until control is disabled. Feeds the safety watchdog, re-enables
    /// control if the motor was stopped, and runs a [`verify`](Self::verify) pass.
    pub fn set(&mut self, value: f64) -> Result<()> {
        self.set_with_sync_group(value, 0)
    }

    /// Command a new output which the device holds until a sync group commit
    ///
    /// With a non-zero `sync_group` mask, the device applies the value when
    /// [`commit_sync_group`](crate::commit_sync_group) is called with an overlapping mask.
    pub fn set_with_sync_group(&mut self, value: f64, sync_group: u8) -> Result<()> {
        self.ensure_control_allowed()?;
        self.watchdog.feed(self.bus.clock().now());
        if self.stopped {
            self.enable_control(0.0)?;
        }

        if self.control_enabled {
            let table = self.control_mode.table();
            let output = if table.invertible && self.inverted {
                -value
            } else {
                value
            };
            let mut payload = Payload::new();
            table.format.push(&mut payload, output)?;
            if sync_group != 0 {
                payload.push_u8(sync_group)?;
            }
            self.send(
                table.set,
                payload.as_slice(),
                SendPeriod::Every(SEND_MESSAGE_PERIOD_MS),
            )?;
        }

        self.value = value;
        self.verify()
    }

    /// The last commanded output
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Start the controller in the active mode
    ///
    /// In position mode, `initial_position` sets the current encoder position; it is ignored
    /// otherwise.
    pub fn enable_control(&mut self, initial_position: f64) -> Result<()> {
        self.ensure_control_allowed()?;
        let table = self.control_mode.table();
        let mut payload = Payload::new();
        if self.control_mode == ControlMode::Position {
            payload.push_fxp16_16(initial_position)?;
        }
        self.send(table.enable, payload.as_slice(), SendPeriod::NoRepeat)?;
        self.control_enabled = true;
        self.stopped = false;
        self.watchdog.rearm(self.bus.clock().now());
        Ok(())
    }

    /// Stop the controller
    ///
    /// Every mode is disabled and every periodic setpoint cancelled, whichever mode the device is
    /// believed to be in.
    pub fn disable_control(&mut self) -> Result<()> {
        for mode in ControlMode::ALL {
            self.send(mode.table().disable, &[], SendPeriod::NoRepeat)?;
        }
        for mode in ControlMode::ALL {
            self.send(mode.table().set, &[], SendPeriod::StopRepeating)?;
        }
        self.control_enabled = false;
        Ok(())
    }

    /// Returns true while control is enabled
    pub fn is_enabled(&self) -> bool {
        self.control_enabled
    }

    /// Disable control and hold the motor stopped until the next [`set`](Self::set)
    pub fn stop_motor(&mut self) -> Result<()> {
        self.disable_control()?;
        self.stopped = true;
        Ok(())
    }

    /// Returns true if the motor was stopped, and will be re-enabled by the next set
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// The active control mode
    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    /// Change the control mode
    ///
    /// Control is disabled first; call [`enable_control`](Self::enable_control) to start the new
    /// mode. Prefer the `set_*_mode` functions, which also configure the feedback source.
    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<()> {
        self.disable_control()?;
        if mode != self.control_mode {
            log::info!(
                "Motor controller {} changing mode {} -> {}",
                self.device_number(),
                self.control_mode,
                mode
            );
        }
        self.control_mode = mode;
        self.unverified.mark(FieldId::ControlMode);
        Ok(())
    }

    fn apply_source(&mut self, source: SourceMode) -> Result<()> {
        let selection = source.selection(self.control_mode);
        self.set_position_reference(selection.position)?;
        self.set_speed_reference(selection.speed)?;
        if let Some(cpr) = selection.codes_per_rev {
            self.set_encoder_codes_per_rev(cpr)?;
        }
        if let Some(turns) = selection.potentiometer_turns {
            self.set_potentiometer_turns(turns)?;
        }
        Ok(())
    }

    /// Switch to open loop control of output as a fraction of bus voltage
    pub fn set_percent_mode(&mut self, source: SourceMode) -> Result<()> {
        self.set_control_mode(ControlMode::PercentVoltage)?;
        self.apply_source(source)
    }

    /// Switch to compensated voltage control
    pub fn set_voltage_mode(&mut self, source: SourceMode) -> Result<()> {
        self.set_control_mode(ControlMode::Voltage)?;
        self.apply_source(source)
    }

    /// Switch to closed loop current control
    pub fn set_current_mode(&mut self, p: f64, i: f64, d: f64, source: SourceMode) -> Result<()> {
        self.set_control_mode(ControlMode::Current)?;
        self.apply_source(source)?;
        self.set_pid(p, i, d)
    }

    /// Switch to closed loop speed control
    pub fn set_speed_mode(&mut self, p: f64, i: f64, d: f64, source: SourceMode) -> Result<()> {
        self.set_control_mode(ControlMode::Speed)?;
        self.apply_source(source)?;
        self.set_pid(p, i, d)
    }

    /// Switch to closed loop position control
    ///
    /// The source must be a quadrature encoder or a potentiometer.
    pub fn set_position_mode(&mut self, p: f64, i: f64, d: f64, source: SourceMode) -> Result<()> {
        if !source.supports_position() {
            return InvalidOperationSnafu {
                message: format!("{source:?} cannot be used for position control"),
            }
            .fail();
        }
        self.set_control_mode(ControlMode::Position)?;
        self.apply_source(source)?;
        self.set_pid(p, i, d)
    }

    /// Returns true if the setpoint is negated before sending
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Negate the setpoint in percent, speed, and voltage modes
    pub fn set_inverted(&mut self, inverted: bool) {
        self.inverted = inverted;
    }

    fn require(&self, field: FieldId) -> Result<()> {
        if field.applies_to(self.control_mode) {
            Ok(())
        } else {
            InvalidOperationSnafu {
                message: format!("{field} does not apply in {} mode", self.control_mode),
            }
            .fail()
        }
    }

    fn update_field(&mut self, field: FieldId) -> Result<()> {
        self.unverified.mark(field);
        self.write_field(field)
    }

    /// The message id holding `field` in the active mode
    fn field_api(&self, field: FieldId) -> Option<MessageId> {
        let api = match field {
            FieldId::ControlMode => api::status::CONTROL_MODE,
            FieldId::SpeedReference => api::speed::REFERENCE,
            FieldId::PositionReference => api::position::REFERENCE,
            FieldId::P => self.control_mode.table().pid?.p,
            FieldId::I => self.control_mode.table().pid?.i,
            FieldId::D => self.control_mode.table().pid?.d,
            FieldId::NeutralMode => api::config::BRAKE_COAST,
            FieldId::EncoderCodesPerRev => api::config::ENCODER_LINES,
            FieldId::PotentiometerTurns => api::config::POT_TURNS,
            FieldId::LimitMode => api::config::LIMIT_MODE,
            FieldId::ForwardLimit => api::config::LIMIT_FORWARD,
            FieldId::ReverseLimit => api::config::LIMIT_REVERSE,
            FieldId::MaxOutputVoltage => api::config::MAX_OUTPUT_VOLTAGE,
            FieldId::VoltageRampRate => match self.control_mode {
                ControlMode::PercentVoltage => api::voltage::SET_RAMP,
                ControlMode::Voltage => api::voltage_comp::COMP_RAMP,
                _ => return None,
            },
            FieldId::FaultTime => api::config::FAULT_TIME,
        };
        Some(api)
    }

    /// The ramp rate as sent on the wire for the active mode
    fn ramp_rate_raw(&self) -> i16 {
        if self.control_mode == ControlMode::Voltage {
            codec::encode_fxp8_8(self.voltage_ramp_rate / CONTROLLER_RATE_HZ)
        } else {
            codec::encode_percentage(
                self.voltage_ramp_rate / (self.max_output_voltage * CONTROLLER_RATE_HZ),
            )
        }
    }

    fn fault_time_ms(&self) -> i16 {
        (self.fault_time * 1000.0) as i16
    }

    /// Transmit the desired value of a field
    fn write_field(&mut self, field: FieldId) -> Result<()> {
        if field == FieldId::ControlMode {
            return self.enable_control(0.0);
        }
        self.require(field)?;
        let Some(api) = self.field_api(field) else {
            return Ok(());
        };

        let mut payload = Payload::new();
        match field {
            FieldId::ControlMode => {}
            FieldId::SpeedReference => {
                payload.push_u8(self.speed_reference.raw())?;
            }
            FieldId::PositionReference => {
                payload.push_u8(self.position_reference.raw())?;
            }
            FieldId::P => {
                payload.push_fxp16_16(self.p)?;
            }
            FieldId::I => {
                payload.push_fxp16_16(self.i)?;
            }
            FieldId::D => {
                payload.push_fxp16_16(self.d)?;
            }
            FieldId::NeutralMode => {
                payload.push_u8(self.neutral_mode.raw())?;
            }
            FieldId::EncoderCodesPerRev => {
                payload.push_i16(self.encoder_codes_per_rev as i16)?;
            }
            FieldId::PotentiometerTurns => {
                payload.push_i16(self.potentiometer_turns as i16)?;
            }
            FieldId::LimitMode => {
                payload.push_u8(self.limit_mode.raw())?;
            }
            FieldId::ForwardLimit => {
                payload.push_fxp16_16(self.forward_limit)?.push_u8(1)?;
            }
            FieldId::ReverseLimit => {
                payload.push_fxp16_16(self.reverse_limit)?.push_u8(1)?;
            }
            FieldId::MaxOutputVoltage => {
                payload.push_fxp8_8(self.max_output_voltage)?;
            }
            FieldId::VoltageRampRate => {
                payload.push_i16(self.ramp_rate_raw())?;
            }
            FieldId::FaultTime => {
                payload.push_i16(self.fault_time_ms())?;
            }
        }
        self.send(api, payload.as_slice(), SendPeriod::NoRepeat)
    }

    /// Compare a value reported by the device with the desired value
    fn field_matches(&self, field: FieldId, data: &[u8]) -> core::result::Result<bool, codec::CodecError> {
        let matches = match field {
            FieldId::ControlMode => codec::unpack_u8(data)? == self.control_mode.status_value(),
            FieldId::SpeedReference => codec::unpack_u8(data)? == self.speed_reference.raw(),
            FieldId::PositionReference => codec::unpack_u8(data)? == self.position_reference.raw(),
            FieldId::P => codec::unpack_i32(data)? == codec::encode_fxp16_16(self.p),
            FieldId::I => codec::unpack_i32(data)? == codec::encode_fxp16_16(self.i),
            FieldId::D => codec::unpack_i32(data)? == codec::encode_fxp16_16(self.d),
            FieldId::NeutralMode => codec::unpack_u8(data)? == self.neutral_mode.raw(),
            FieldId::EncoderCodesPerRev => {
                codec::unpack_i16(data)? == self.encoder_codes_per_rev as i16
            }
            FieldId::PotentiometerTurns => {
                codec::unpack_i16(data)? == self.potentiometer_turns as i16
            }
            FieldId::LimitMode => codec::unpack_u8(data)? == self.limit_mode.raw(),
            FieldId::ForwardLimit => {
                codec::unpack_i32(data)? == codec::encode_fxp16_16(self.forward_limit)
            }
            FieldId::ReverseLimit => {
                codec::unpack_i32(data)? == codec::encode_fxp16_16(self.reverse_limit)
            }
            FieldId::MaxOutputVoltage => {
                // The device re-quantizes on read back, so allow one step either way
                let reported = codec::unpack_i16(data)? as i32;
                let desired = codec::encode_fxp8_8(self.max_output_voltage) as i32;
                (reported - desired).abs() <= 1
            }
            FieldId::VoltageRampRate => codec::unpack_i16(data)? == self.ramp_rate_raw(),
            FieldId::FaultTime => codec::unpack_i16(data)? == self.fault_time_ms(),
        };
        Ok(matches)
    }

    /// Reconcile the device configuration with the desired configuration
    ///
    /// Intended to be called on every iteration of the control loop. For each unverified field
    /// which applies to the active mode, the latest response from the device is checked: a
    /// missing response is requested, a matching one marks the field verified, and a mismatch
    /// causes the value to be sent again. A power cycle of the device marks everything unverified.
    ///
    /// A device which never answers leaves fields unverified indefinitely; that is not an error.
    pub fn verify(&mut self) -> Result<()> {
        if let Some(msg) = self.receive(api::status::POWER)? {
            if msg.data().first().copied().unwrap_or(0) != 0 {
                log::warn!(
                    "Motor controller {} was power cycled; restoring configuration",
                    self.device_number()
                );
                self.send(api::status::POWER, &[1], SendPeriod::NoRepeat)?;
                self.unverified.mark_all(self.control_mode);
                self.status.clear_received();
                for api in CONFIG_APIS {
                    self.receive(api)?;
                }
            }
        }

        for field in FieldId::ALL {
            if !self.unverified.contains(field) || !field.applies_to(self.control_mode) {
                continue;
            }
            if field == FieldId::ControlMode && !self.control_enabled {
                continue;
            }
            let Some(api) = self.field_api(field) else {
                continue;
            };

            match self.receive(api)? {
                None => self.request(api)?,
                Some(msg) => match self.field_matches(field, msg.data()) {
                    Ok(true) => {
                        log::trace!("Verified {field} on device {}", self.device_number());
                        self.unverified.clear(field);
                    }
                    Ok(false) => {
                        log::debug!(
                            "Device {} reported wrong {field}; resending",
                            self.device_number()
                        );
                        self.write_field(field)?;
                    }
                    Err(e) => {
                        log::debug!(
                            "Device {} sent malformed {field} ({e}); resending",
                            self.device_number()
                        );
                        self.write_field(field)?;
                    }
                },
            }
        }

        if !self.status.all_received() {
            self.setup_periodic_status()?;
            self.update_periodic_status()?;
        }
        Ok(())
    }

    /// Returns true if `field` has been confirmed by the device
    pub fn is_verified(&self, field: FieldId) -> bool {
        !self.unverified.contains(field)
    }

    /// Returns true once every field that is checked in the current state has been confirmed
    pub fn all_verified(&self) -> bool {
        self.unverified
            .pending(self.control_mode)
            .all(|f| f == FieldId::ControlMode && !self.control_enabled)
    }

    /// Configure the device to send the three periodic status messages
    pub fn setup_periodic_status(&mut self) -> Result<()> {
        let mut period = Payload::new();
        period.push_i16(SEND_MESSAGE_PERIOD_MS as i16)?;
        self.send(
            api::periodic_status::ENABLE_S0,
            period.as_slice(),
            SendPeriod::NoRepeat,
        )?;
        self.send(
            api::periodic_status::ENABLE_S1,
            period.as_slice(),
            SendPeriod::NoRepeat,
        )?;
        self.send(
            api::periodic_status::ENABLE_S2,
            period.as_slice(),
            SendPeriod::NoRepeat,
        )?;

        self.send(
            api::periodic_status::CONFIG_S0,
            &status_items::GROUP0_LAYOUT,
            SendPeriod::NoRepeat,
        )?;
        self.send(
            api::periodic_status::CONFIG_S1,
            &status_items::GROUP1_LAYOUT,
            SendPeriod::NoRepeat,
        )?;
        self.send(
            api::periodic_status::CONFIG_S2,
            &status_items::GROUP2_LAYOUT,
            SendPeriod::NoRepeat,
        )?;
        Ok(())
    }

    /// Decode any periodic status messages received since the last call
    ///
    /// A group whose payload cannot be decoded is marked as not received, so the next `verify`
    /// sets up periodic status again.
    pub fn update_periodic_status(&mut self) -> Result<()> {
        let groups = [
            api::periodic_status::DATA_S0,
            api::periodic_status::DATA_S1,
            api::periodic_status::DATA_S2,
        ];
        for (group, id) in groups.into_iter().enumerate() {
            let Some(msg) = self.receive(id)? else {
                continue;
            };
            if let Err(e) = self.status.update(group, msg.data()) {
                log::debug!(
                    "Device {} sent malformed status group {group} ({e})",
                    self.device_number()
                );
            }
        }
        Ok(())
    }

    /// The cached status, without checking for new messages
    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// Bus voltage, in volts
    pub fn bus_voltage(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.bus_voltage)
    }

    /// Output voltage, in volts
    pub fn output_voltage(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.output_voltage)
    }

    /// Output current, in amps
    pub fn output_current(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.output_current)
    }

    /// Temperature, in degrees Celsius
    pub fn temperature(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.temperature)
    }

    /// Position, in rotations
    pub fn position(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.position)
    }

    /// Speed, in rotations per minute
    pub fn speed(&mut self) -> Result<f64> {
        self.update_periodic_status()?;
        Ok(self.status.speed)
    }

    /// Returns true if motion in the forward direction is allowed by the limits
    pub fn forward_limit_ok(&mut self) -> Result<bool> {
        self.update_periodic_status()?;
        Ok(self.status.limits.contains(Limits::FORWARD))
    }

    /// Returns true if motion in the reverse direction is allowed by the limits
    pub fn reverse_limit_ok(&mut self) -> Result<bool> {
        self.update_periodic_status()?;
        Ok(self.status.limits.contains(Limits::REVERSE))
    }

    /// Active faults
    pub fn faults(&mut self) -> Result<Faults> {
        self.update_periodic_status()?;
        Ok(self.status.faults)
    }

    /// Speed reference source
    pub fn speed_reference(&self) -> ReferenceSource {
        self.speed_reference
    }

    /// Set the speed reference source
    pub fn set_speed_reference(&mut self, reference: ReferenceSource) -> Result<()> {
        self.speed_reference = reference;
        self.update_field(FieldId::SpeedReference)
    }

    /// Position reference source
    pub fn position_reference(&self) -> ReferenceSource {
        self.position_reference
    }

    /// Set the position reference source
    pub fn set_position_reference(&mut self, reference: ReferenceSource) -> Result<()> {
        self.position_reference = reference;
        self.update_field(FieldId::PositionReference)
    }

    /// Proportional gain
    ///
    /// Fails in modes without a PID loop.
    pub fn p(&self) -> Result<f64> {
        self.require(FieldId::P)?;
        Ok(self.p)
    }

    /// Set the proportional gain of the active mode
    pub fn set_p(&mut self, p: f64) -> Result<()> {
        self.require(FieldId::P)?;
        self.p = p;
        self.update_field(FieldId::P)
    }

    /// Integral gain
    pub fn i(&self) -> Result<f64> {
        self.require(FieldId::I)?;
        Ok(self.i)
    }

    /// Set the integral gain of the active mode
    pub fn set_i(&mut self, i: f64) -> Result<()> {
        self.require(FieldId::I)?;
        self.i = i;
        self.update_field(FieldId::I)
    }

    /// Derivative gain
    pub fn d(&self) -> Result<f64> {
        self.require(FieldId::D)?;
        Ok(self.d)
    }

    /// Set the derivative gain of the active mode
    pub fn set_d(&mut self, d: f64) -> Result<()> {
        self.require(FieldId::D)?;
        self.d = d;
        self.update_field(FieldId::D)
    }

    /// Set all three gains of the active mode
    pub fn set_pid(&mut self, p: f64, i: f64, d: f64) -> Result<()> {
        self.set_p(p)?;
        self.set_i(i)?;
        self.set_d(d)
    }

    /// Neutral behavior
    pub fn neutral_mode(&self) -> NeutralMode {
        self.neutral_mode
    }

    /// Set the neutral behavior
    pub fn set_neutral_mode(&mut self, mode: NeutralMode) -> Result<()> {
        self.neutral_mode = mode;
        self.update_field(FieldId::NeutralMode)
    }

    /// Encoder codes per revolution
    pub fn encoder_codes_per_rev(&self) -> u16 {
        self.encoder_codes_per_rev
    }

    /// Set the encoder codes per revolution
    pub fn set_encoder_codes_per_rev(&mut self, codes: u16) -> Result<()> {
        self.encoder_codes_per_rev = codes;
        self.update_field(FieldId::EncoderCodesPerRev)
    }

    /// Potentiometer turns
    pub fn potentiometer_turns(&self) -> u16 {
        self.potentiometer_turns
    }

    /// Set the number of turns of the potentiometer
    pub fn set_potentiometer_turns(&mut self, turns: u16) -> Result<()> {
        self.potentiometer_turns = turns;
        self.update_field(FieldId::PotentiometerTurns)
    }

    /// Limit mode
    pub fn limit_mode(&self) -> LimitMode {
        self.limit_mode
    }

    /// Set the limit mode
    pub fn set_limit_mode(&mut self, mode: LimitMode) -> Result<()> {
        self.limit_mode = mode;
        self.update_field(FieldId::LimitMode)
    }

    /// Forward soft limit, in rotations
    pub fn forward_limit(&self) -> f64 {
        self.forward_limit
    }

    /// Set the forward soft limit
    pub fn set_forward_limit(&mut self, position: f64) -> Result<()> {
        self.forward_limit = position;
        self.update_field(FieldId::ForwardLimit)
    }

    /// Reverse soft limit, in rotations
    pub fn reverse_limit(&self) -> f64 {
        self.reverse_limit
    }

    /// Set the reverse soft limit
    pub fn set_reverse_limit(&mut self, position: f64) -> Result<()> {
        self.reverse_limit = position;
        self.update_field(FieldId::ReverseLimit)
    }

    /// Enable soft position limits
    pub fn config_soft_position_limits(&mut self, forward: f64, reverse: f64) -> Result<()> {
        self.set_limit_mode(LimitMode::SoftPositionLimits)?;
        self.set_forward_limit(forward)?;
        self.set_reverse_limit(reverse)
    }

    /// Use only the limit switch inputs
    pub fn disable_soft_position_limits(&mut self) -> Result<()> {
        self.set_limit_mode(LimitMode::SwitchInputsOnly)
    }

    /// Maximum output voltage, in volts
    pub fn max_output_voltage(&self) -> f64 {
        self.max_output_voltage
    }

    /// Set the maximum output voltage
    ///
    /// Also scales the percent mode voltage ramp rate, so that is resent if it applies.
    pub fn set_max_output_voltage(&mut self, voltage: f64) -> Result<()> {
        self.max_output_voltage = voltage;
        self.update_field(FieldId::MaxOutputVoltage)?;
        if self.control_mode == ControlMode::PercentVoltage && self.voltage_ramp_rate != 0.0 {
            self.update_field(FieldId::VoltageRampRate)?;
        }
        Ok(())
    }

    /// Voltage ramp rate, in volts per second
    ///
    /// Only applies in percent voltage and voltage modes.
    pub fn voltage_ramp_rate(&self) -> Result<f64> {
        self.require(FieldId::VoltageRampRate)?;
        Ok(self.voltage_ramp_rate)
    }

    /// Set the voltage ramp rate, in volts per second; 0 disables ramping
    pub fn set_voltage_ramp_rate(&mut self, rate: f64) -> Result<()> {
        self.require(FieldId::VoltageRampRate)?;
        self.voltage_ramp_rate = rate;
        self.update_field(FieldId::VoltageRampRate)
    }

    /// Fault recovery time, in seconds
    pub fn fault_time(&self) -> f64 {
        self.fault_time
    }

    /// Set the time the device waits after a fault before resuming, in seconds
    ///
    /// Clamped to 0.5..=3.0.
    pub fn set_fault_time(&mut self, seconds: f64) -> Result<()> {
        self.fault_time = seconds.clamp(MIN_FAULT_TIME, MAX_FAULT_TIME);
        self.update_field(FieldId::FaultTime)
    }

    /// Enable or disable the safety watchdog
    pub fn set_safety_enabled(&mut self, enabled: bool) {
        if enabled && !self.watchdog.is_enabled() {
            self.watchdog.feed(self.bus.clock().now());
        }
        self.watchdog.set_enabled(enabled);
    }

    /// Returns true if the safety watchdog is enabled
    pub fn safety_enabled(&self) -> bool {
        self.watchdog.is_enabled()
    }

    /// Set the time allowed between [`set`](Self::set) calls before the motor is stopped
    pub fn set_expiration(&mut self, expiration: Duration) {
        self.watchdog.set_expiration(expiration);
    }

    /// The time allowed between [`set`](Self::set) calls
    pub fn expiration(&self) -> Duration {
        self.watchdog.expiration()
    }

    /// Returns false if the safety watchdog has expired
    pub fn is_alive(&self) -> bool {
        self.watchdog.is_alive(self.bus.clock().now())
    }

    /// The safety watchdog
    pub fn watchdog(&self) -> &SafetyWatchdog {
        &self.watchdog
    }

    /// Stop the motor if the safety watchdog has expired
    ///
    /// Should be called periodically, independently of [`verify`](Self::verify). Returns true if
    /// this call stopped the motor.
    pub fn check_safety(&mut self) -> Result<bool> {
        if self.watchdog.check(self.bus.clock().now()) {
            log::warn!(
                "{} safety timeout: no output set within {:?}; stopping motor",
                self.description(),
                self.watchdog.expiration()
            );
            self.stop_motor()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl<M: CanSessionMux> Drop for MotorController<M> {
    fn drop(&mut self) {
        if let Err(e) = self.disable_control() {
            log::warn!("Error disabling {} on close: {e}", self.description());
        }
        if let Err(e) = self.send(api::status::POWER, &[], SendPeriod::StopRepeating) {
            log::warn!("Error cancelling status request on close: {e}");
        }
    }
}
