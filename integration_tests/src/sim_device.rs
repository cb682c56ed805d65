//! A simulated motor controller firmware reachable through an in-memory bus
//!
//! [`SimBus`] implements [`CanSessionMux`], so sessions can be opened against it directly. Every
//! frame a session sends is logged and delivered to the addressed [`SimDevice`], which behaves
//! like the firmware: an empty frame on a configuration API is a read request, answered into the
//! bus mailbox; a frame with data writes the value. Periodic transmissions are replayed whenever
//! the session reads their response, standing in for the passage of time.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use lmcan_client::ControlMode;
use lmcan_common::{
    api::{self, MessageId, DEVICE_NUMBER_MASK, FULL_MESSAGE_MASK, REMOTE_FRAME, TRUSTED_PREFIX_LEN},
    codec,
    constants::{reference, status_items},
    messages::MAX_DATA_LENGTH,
    traits::{BusError, CanSessionMux, ReceivedMessage, SendPeriod},
};

/// Firmware version reported by simulated devices unless changed
pub const DEFAULT_FIRMWARE_VERSION: u32 = 109;
/// Hardware version reported by simulated devices unless changed
pub const DEFAULT_HARDWARE_VERSION: u8 = 2;

/// A frame sent by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Identifier, including the remote flag
    pub id: u32,
    /// Payload as put on the bus
    pub data: Vec<u8>,
    /// Requested repeat behavior
    pub period: SendPeriod,
}

/// Measurements reported by a simulated device in its periodic status
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Bus voltage, in volts
    pub bus_voltage: f64,
    /// Output current, in amps
    pub current: f64,
    /// Temperature, in degrees Celsius
    pub temperature: f64,
    /// Position, in rotations
    pub position: f64,
    /// Speed, in RPM
    pub speed: f64,
    /// Raw limit flags
    pub limits: u8,
    /// Raw fault flags
    pub faults: u8,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            bus_voltage: 12.0,
            current: 0.0,
            temperature: 25.0,
            position: 0.0,
            speed: 0.0,
            limits: 0x03,
            faults: 0,
        }
    }
}

/// State of one simulated motor controller
#[derive(Debug, Clone)]
pub struct SimDevice {
    /// Version returned to a firmware version request
    pub firmware_version: u32,
    /// Version returned to a hardware version request; no answer when `None`
    pub hardware_version: Option<u8>,
    /// Active control mode
    pub mode: ControlMode,
    /// Whether the controller is running
    pub enabled: bool,
    /// Raw bytes of the applied setpoint
    pub output: Vec<u8>,
    /// Setpoint held until a sync group commit, and its group mask
    pub pending_sync: Option<(Vec<u8>, u8)>,
    /// Set at power up, cleared by writing 1 to the power status API
    pub power_flag: bool,
    /// Values reported in periodic status
    pub telemetry: Telemetry,
    registers: HashMap<u32, Vec<u8>>,
    status_periods: [i16; 3],
    status_layouts: [Option<[u8; 8]>; 3],
}

impl Default for SimDevice {
    fn default() -> Self {
        Self {
            firmware_version: DEFAULT_FIRMWARE_VERSION,
            hardware_version: Some(DEFAULT_HARDWARE_VERSION),
            // Sessions assume the device is running in percent mode when they open
            mode: ControlMode::PercentVoltage,
            enabled: true,
            output: vec![0, 0],
            pending_sync: None,
            power_flag: false,
            telemetry: Telemetry::default(),
            registers: default_registers(),
            status_periods: [0; 3],
            status_layouts: [None; 3],
        }
    }
}

fn default_registers() -> HashMap<u32, Vec<u8>> {
    let mut registers = HashMap::new();
    registers.insert(api::speed::REFERENCE.raw(), vec![reference::NONE]);
    registers.insert(api::position::REFERENCE.raw(), vec![reference::NONE]);
    for mode in ControlMode::ALL {
        if let Some(pid) = mode.table().pid {
            for id in [pid.p, pid.i, pid.d] {
                registers.insert(id.raw(), vec![0; 4]);
            }
        }
    }
    registers.insert(api::config::BRAKE_COAST.raw(), vec![0]);
    registers.insert(api::config::ENCODER_LINES.raw(), vec![0; 2]);
    registers.insert(api::config::POT_TURNS.raw(), vec![0; 2]);
    registers.insert(api::config::LIMIT_MODE.raw(), vec![0]);
    registers.insert(api::config::LIMIT_FORWARD.raw(), vec![0; 5]);
    registers.insert(api::config::LIMIT_REVERSE.raw(), vec![0; 5]);
    registers.insert(
        api::config::MAX_OUTPUT_VOLTAGE.raw(),
        codec::encode_fxp8_8(12.0).to_le_bytes().to_vec(),
    );
    registers.insert(api::config::FAULT_TIME.raw(), vec![0; 2]);
    registers.insert(api::voltage::SET_RAMP.raw(), vec![0; 2]);
    registers.insert(api::voltage_comp::COMP_RAMP.raw(), vec![0; 2]);
    registers
}

const STATUS_DATA: [MessageId; 3] = [
    api::periodic_status::DATA_S0,
    api::periodic_status::DATA_S1,
    api::periodic_status::DATA_S2,
];
const STATUS_ENABLE: [MessageId; 3] = [
    api::periodic_status::ENABLE_S0,
    api::periodic_status::ENABLE_S1,
    api::periodic_status::ENABLE_S2,
];
const STATUS_CONFIG: [MessageId; 3] = [
    api::periodic_status::CONFIG_S0,
    api::periodic_status::CONFIG_S1,
    api::periodic_status::CONFIG_S2,
];

impl SimDevice {
    /// Read a configuration register, by API id without device number
    pub fn register(&self, api: MessageId) -> Option<&[u8]> {
        self.registers.get(&api.api().raw()).map(|r| r.as_slice())
    }

    /// The applied setpoint, decoded in the format of the active mode
    pub fn output_value(&self) -> Option<f64> {
        self.mode.table().format.unpack(&self.output).ok()
    }

    fn status_item(&self, code: u8) -> u8 {
        let output_percent = if self.mode == ControlMode::PercentVoltage && self.enabled {
            codec::unpack_i16(&self.output).unwrap_or(0)
        } else {
            0
        };
        let t = &self.telemetry;
        let bus = codec::encode_fxp8_8(t.bus_voltage).to_le_bytes();
        let current = codec::encode_fxp8_8(t.current).to_le_bytes();
        let temperature = codec::encode_fxp8_8(t.temperature).to_le_bytes();
        let position = codec::encode_fxp16_16(t.position).to_le_bytes();
        let speed = codec::encode_fxp16_16(t.speed).to_le_bytes();
        let percent = output_percent.to_le_bytes();
        match code {
            status_items::OUTPUT_PERCENT_B0 => percent[0],
            status_items::OUTPUT_PERCENT_B1 => percent[1],
            status_items::BUS_VOLTAGE_B0 => bus[0],
            status_items::BUS_VOLTAGE_B1 => bus[1],
            status_items::CURRENT_B0 => current[0],
            status_items::CURRENT_B1 => current[1],
            status_items::TEMPERATURE_B0 => temperature[0],
            status_items::TEMPERATURE_B1 => temperature[1],
            status_items::POSITION_B0..=status_items::POSITION_B3 => {
                position[(code - status_items::POSITION_B0) as usize]
            }
            status_items::SPEED_B0..=status_items::SPEED_B3 => {
                speed[(code - status_items::SPEED_B0) as usize]
            }
            status_items::LIMIT_CLEAR => t.limits,
            status_items::FAULT => t.faults,
            _ => 0,
        }
    }

    fn status_data(&self, group: usize) -> Option<Vec<u8>> {
        if self.status_periods[group] <= 0 {
            return None;
        }
        let layout = self.status_layouts[group]?;
        Some(layout.iter().map(|code| self.status_item(*code)).collect())
    }

    fn power_cycle(&mut self) {
        let telemetry = self.telemetry;
        *self = SimDevice {
            firmware_version: self.firmware_version,
            hardware_version: self.hardware_version,
            enabled: false,
            power_flag: true,
            telemetry,
            ..SimDevice::default()
        };
    }
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<u8, SimDevice>,
    mailbox: HashMap<u32, ReceivedMessage>,
    periodic: HashMap<u32, Vec<u8>>,
    sent: Vec<SentFrame>,
    lossy: bool,
    drop_next: HashMap<u32, bool>,
    truncate: HashMap<u32, (usize, Option<usize>)>,
    time_ms: u64,
}

impl SimState {
    fn respond(&mut self, id: u32, data: &[u8], may_drop: bool) {
        if self.lossy && may_drop {
            let drop = self.drop_next.entry(id).or_insert(true);
            let dropped = *drop;
            *drop = !*drop;
            if dropped {
                log::trace!("Sim dropped response {id:#010x}");
                return;
            }
        }
        let api_id = MessageId::from_raw(id).api().raw();
        let mut data = data;
        if let Some((len, remaining)) = self.truncate.get_mut(&api_id) {
            data = &data[..data.len().min(*len)];
            if let Some(count) = remaining {
                *count -= 1;
                if *count == 0 {
                    self.truncate.remove(&api_id);
                }
            }
        }
        self.mailbox
            .insert(id, ReceivedMessage::new(id, data, self.time_ms));
    }

    fn commit_sync(&mut self, mask: u8) {
        for device in self.devices.values_mut() {
            if let Some((value, group)) = device.pending_sync.take() {
                if group & mask != 0 {
                    device.output = value;
                } else {
                    device.pending_sync = Some((value, group));
                }
            }
        }
    }

    fn handle(&mut self, id: u32, data: &[u8], may_drop: bool) {
        let remote = id & REMOTE_FRAME != 0;
        let wire_id = id & FULL_MESSAGE_MASK;
        let msg_id = MessageId::from_raw(wire_id);
        let api_id = msg_id.api();

        if api_id == api::SYNC {
            if let Some(mask) = data.first() {
                self.commit_sync(*mask);
            }
            return;
        }

        let Some(device) = self.devices.get_mut(&msg_id.device_number()) else {
            return;
        };

        let mut response = None;
        if api_id == api::FIRMWARE_VERSION {
            if remote {
                response = Some((device.firmware_version as i32).to_le_bytes().to_vec());
            }
        } else if api_id == api::HARDWARE_VERSION {
            response = device.hardware_version.map(|hw| vec![hw]);
        } else if api_id == api::status::POWER {
            match data.first() {
                None => response = Some(vec![device.power_flag as u8]),
                Some(1) => device.power_flag = false,
                Some(_) => {}
            }
        } else if api_id == api::status::CONTROL_MODE {
            response = Some(vec![device.mode.status_value()]);
        } else if let Some(group) = STATUS_ENABLE.iter().position(|a| *a == api_id) {
            device.status_periods[group] = codec::unpack_i16(data).unwrap_or(0);
        } else if let Some(group) = STATUS_CONFIG.iter().position(|a| *a == api_id) {
            let mut layout = [status_items::END; 8];
            let len = data.len().min(8);
            layout[..len].copy_from_slice(&data[..len]);
            device.status_layouts[group] = Some(layout);
        } else if let Some(register) = device.registers.get_mut(&api_id.raw()) {
            if data.is_empty() {
                response = Some(register.clone());
            } else {
                *register = data.to_vec();
            }
        } else {
            for mode in ControlMode::ALL {
                let table = mode.table();
                let payload = data.get(TRUSTED_PREFIX_LEN..).unwrap_or(&[]);
                if api_id == table.enable {
                    device.mode = mode;
                    device.enabled = true;
                    device.pending_sync = None;
                    if mode == ControlMode::Position {
                        if let Ok(position) = codec::unpack_fxp16_16(payload) {
                            device.telemetry.position = position;
                        }
                    }
                } else if api_id == table.disable {
                    device.enabled = false;
                } else if api_id == table.set && device.enabled && device.mode == mode {
                    let len = table.format.encoded_len();
                    let Some(value) = payload.get(..len) else {
                        continue;
                    };
                    match payload.get(len) {
                        Some(group) if *group != 0 => {
                            device.pending_sync = Some((value.to_vec(), *group))
                        }
                        _ => device.output = value.to_vec(),
                    }
                }
            }
        }

        if let Some(response) = response {
            self.respond(wire_id, &response, may_drop);
        }
    }
}

/// An in-memory bus with simulated motor controllers attached
#[derive(Debug, Default)]
pub struct SimBus {
    state: Mutex<SimState>,
}

impl SimBus {
    /// Create a bus with no devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus with default devices at the given device numbers
    pub fn with_devices(device_numbers: &[u8]) -> Self {
        let bus = Self::new();
        for dn in device_numbers {
            bus.add_device(*dn);
        }
        bus
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device with default state
    pub fn add_device(&self, device_number: u8) {
        self.lock()
            .devices
            .insert(device_number, SimDevice::default());
    }

    /// Modify the state of a device
    ///
    /// Panics if there is no device at `device_number`.
    pub fn modify_device(&self, device_number: u8, f: impl FnOnce(&mut SimDevice)) {
        let mut state = self.lock();
        let device = state
            .devices
            .get_mut(&device_number)
            .expect("no such simulated device");
        f(device);
    }

    /// A snapshot of a device's state
    pub fn device(&self, device_number: u8) -> Option<SimDevice> {
        self.lock().devices.get(&device_number).cloned()
    }

    /// Read a device register
    pub fn register(&self, device_number: u8, api: MessageId) -> Option<Vec<u8>> {
        self.lock()
            .devices
            .get(&device_number)
            .and_then(|d| d.register(api).map(|r| r.to_vec()))
    }

    /// Overwrite a device register without the session knowing
    pub fn set_register(&self, device_number: u8, api: MessageId, value: &[u8]) {
        self.modify_device(device_number, |d| {
            d.registers.insert(api.api().raw(), value.to_vec());
        });
    }

    /// Simulate a power cycle: registers return to defaults and the power flag is raised
    pub fn power_cycle(&self, device_number: u8) {
        self.modify_device(device_number, SimDevice::power_cycle);
    }

    /// When enabled, every other response to each identifier is lost
    pub fn set_lossy(&self, lossy: bool) {
        let mut state = self.lock();
        state.lossy = lossy;
        state.drop_next.clear();
    }

    /// Cut responses on `api` to at most `len` bytes, for the next `count` responses or forever
    pub fn truncate_responses(&self, api: MessageId, len: usize, count: Option<usize>) {
        let mut state = self.lock();
        if count == Some(0) {
            state.truncate.remove(&api.api().raw());
        } else {
            state.truncate.insert(api.api().raw(), (len, count));
        }
    }

    /// All frames sent so far
    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Forget the sent frames
    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    /// Frames sent on `api` to `device_number`
    ///
    /// Broadcast APIs are matched with device number 0.
    pub fn sent_to(&self, api: MessageId, device_number: u8) -> Vec<SentFrame> {
        let target = (api.wire_id() & !DEVICE_NUMBER_MASK) | device_number as u32;
        self.lock()
            .sent
            .iter()
            .filter(|f| f.id & FULL_MESSAGE_MASK == target)
            .cloned()
            .collect()
    }

    /// Returns true if a periodic transmission of `api` to `device_number` is active
    pub fn is_repeating(&self, api: MessageId, device_number: u8) -> bool {
        let target = (api.wire_id() & !DEVICE_NUMBER_MASK) | device_number as u32;
        self.lock().periodic.contains_key(&target)
    }
}

impl CanSessionMux for SimBus {
    fn send_message(&self, id: u32, data: &[u8], period: SendPeriod) -> Result<(), BusError> {
        if data.len() > MAX_DATA_LENGTH {
            return Err(BusError::PayloadTooLarge { len: data.len() });
        }
        let mut state = self.lock();
        state.time_ms += 1;
        state.sent.push(SentFrame {
            id,
            data: data.to_vec(),
            period,
        });
        match period {
            SendPeriod::StopRepeating => {
                state.periodic.remove(&(id & FULL_MESSAGE_MASK));
            }
            SendPeriod::Every(_) => {
                state.periodic.insert(id & FULL_MESSAGE_MASK, data.to_vec());
                state.handle(id, data, true);
            }
            SendPeriod::NoRepeat => state.handle(id, data, true),
        }
        Ok(())
    }

    fn receive_message(&self, id: u32, mask: u32) -> Result<Option<ReceivedMessage>, BusError> {
        let mut state = self.lock();
        state.time_ms += 1;
        let wire_id = id & FULL_MESSAGE_MASK;

        // A periodic request for this id has been repeated since the last read
        if let Some(data) = state.periodic.get(&wire_id).cloned() {
            state.handle(wire_id, &data, false);
        }

        let msg_id = MessageId::from_raw(wire_id);
        if let Some(group) = STATUS_DATA.iter().position(|a| *a == msg_id.api()) {
            let data = state
                .devices
                .get(&msg_id.device_number())
                .and_then(|d| d.status_data(group));
            if let Some(data) = data {
                state.respond(wire_id, &data, false);
            }
        }

        let key = state
            .mailbox
            .keys()
            .find(|k| **k & mask == wire_id & mask)
            .copied();
        Ok(key.and_then(|k| state.mailbox.remove(&k)))
    }
}
