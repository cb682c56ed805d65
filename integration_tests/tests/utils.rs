#![allow(dead_code)]
use std::sync::Arc;

use integration_tests::sim_device::SimBus;
use lmcan_client::{Bus, ManualClock, MotorController};
use lmcan_common::DeviceNumber;

pub type SimController = MotorController<Arc<SimBus>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a simulated bus with devices at `device_numbers`, and a session bus using a manual clock
pub fn setup(device_numbers: &[u8]) -> (Arc<SimBus>, ManualClock, Bus<Arc<SimBus>>) {
    init_logging();
    let sim = Arc::new(SimBus::with_devices(device_numbers));
    let clock = ManualClock::new();
    let bus = Bus::with_clock(sim.clone(), clock.clone());
    (sim, clock, bus)
}

pub fn dn(value: u8) -> DeviceNumber {
    DeviceNumber::new(value).unwrap()
}

pub fn open(bus: &Bus<Arc<SimBus>>, device_number: u8) -> SimController {
    MotorController::open(bus, dn(device_number)).unwrap()
}

/// Call verify until every field is confirmed, returning the number of calls
pub fn converge(controller: &mut SimController, max_calls: usize) -> usize {
    for calls in 1..=max_calls {
        controller.verify().unwrap();
        if controller.all_verified() {
            return calls;
        }
    }
    panic!("Not verified after {max_calls} calls");
}
