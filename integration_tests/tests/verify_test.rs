use assertables::assert_le;
use integration_tests::sim_device::SentFrame;
use lmcan_client::{
    ControlMode, FieldId, MotorControllerError, NeutralMode, ReferenceSource, SourceMode,
};
use lmcan_common::{api, codec, constants::reference};

mod utils;
use utils::{converge, open, setup, SimController};

fn configure(mc: &mut SimController) {
    mc.set_neutral_mode(NeutralMode::Brake).unwrap();
    mc.set_max_output_voltage(10.0).unwrap();
    mc.set_voltage_ramp_rate(6.0).unwrap();
    mc.set_fault_time(1.0).unwrap();
    mc.config_soft_position_limits(5.0, -5.0).unwrap();
}

#[test]
fn test_pid_uses_mode_specific_ids() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.set_current_mode(0.0, 0.0, 0.0, SourceMode::None).unwrap();
    sim.clear_sent();

    mc.set_p(1.25).unwrap();
    let frames = sim.sent_to(api::current::P, 5);
    assert_eq!(1, frames.len());
    assert_eq!(vec![0x00, 0x40, 0x01, 0x00], frames[0].data);
    assert!(sim.sent_to(api::speed::P, 5).is_empty());
    assert!(sim.sent_to(api::position::P, 5).is_empty());
    assert_eq!(1.25, mc.p().unwrap());

    mc.set_voltage_mode(SourceMode::None).unwrap();
    assert!(matches!(
        mc.p(),
        Err(MotorControllerError::InvalidOperation { .. })
    ));
    assert!(matches!(
        mc.set_i(0.1),
        Err(MotorControllerError::InvalidOperation { .. })
    ));
}

#[test]
fn test_verify_converges_and_goes_quiet() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    configure(&mut mc);
    assert!(!mc.all_verified());

    let calls = converge(&mut mc, 10);
    assert_le!(calls, 2);
    assert_eq!(Some(vec![1]), sim.register(5, api::config::BRAKE_COAST));
    assert_eq!(
        Some(codec::encode_fxp8_8(10.0).to_le_bytes().to_vec()),
        sim.register(5, api::config::MAX_OUTPUT_VOLTAGE)
    );

    sim.clear_sent();
    for _ in 0..5 {
        mc.verify().unwrap();
    }
    assert_eq!(Vec::<SentFrame>::new(), sim.sent());
}

#[test]
fn test_verify_converges_under_loss() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut clean = open(&bus, 5);
    configure(&mut clean);
    let clean_calls = converge(&mut clean, 10);
    drop(clean);

    let (sim_lossy, _clock, bus) = setup(&[5]);
    sim_lossy.set_lossy(true);
    let mut lossy = open(&bus, 5);
    configure(&mut lossy);
    let lossy_calls = converge(&mut lossy, 10);

    assert_le!(lossy_calls, 2 * clean_calls);
    assert_eq!(Some(vec![1]), sim_lossy.register(5, api::config::LIMIT_MODE));
    // The first simulator saw no loss, and is unaffected by the second
    assert_eq!(Some(vec![1]), sim.register(5, api::config::LIMIT_MODE));
}

#[test]
fn test_mismatch_is_resent() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.set_neutral_mode(NeutralMode::Brake).unwrap();
    // The device loses the write
    sim.set_register(5, api::config::BRAKE_COAST, &[2]);
    sim.clear_sent();

    converge(&mut mc, 10);

    let writes: Vec<_> = sim
        .sent_to(api::config::BRAKE_COAST, 5)
        .into_iter()
        .filter(|f| !f.data.is_empty())
        .collect();
    assert_eq!(1, writes.len());
    assert_eq!(vec![1], writes[0].data);
    assert_eq!(Some(vec![1]), sim.register(5, api::config::BRAKE_COAST));
    assert!(mc.is_verified(FieldId::NeutralMode));
}

#[test]
fn test_malformed_response_is_resent() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.config_soft_position_limits(2.5, -1.0).unwrap();
    // A one byte reply cannot hold a fixed point limit
    sim.set_register(5, api::config::LIMIT_FORWARD, &[1]);
    sim.clear_sent();

    converge(&mut mc, 10);

    let writes: Vec<_> = sim
        .sent_to(api::config::LIMIT_FORWARD, 5)
        .into_iter()
        .filter(|f| !f.data.is_empty())
        .collect();
    assert_eq!(1, writes.len());
    assert_eq!(vec![0x00, 0x80, 0x02, 0x00, 0x01], writes[0].data);
    assert_eq!(
        Some(vec![0x00, 0x80, 0x02, 0x00, 0x01]),
        sim.register(5, api::config::LIMIT_FORWARD)
    );
    assert!(mc.is_verified(FieldId::ForwardLimit));
}

#[test]
fn test_max_voltage_tolerates_one_step() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.set_max_output_voltage(10.0).unwrap();
    let raw = codec::encode_fxp8_8(10.0) + 1;
    sim.set_register(5, api::config::MAX_OUTPUT_VOLTAGE, &raw.to_le_bytes());
    sim.clear_sent();

    converge(&mut mc, 10);
    assert!(sim
        .sent_to(api::config::MAX_OUTPUT_VOLTAGE, 5)
        .iter()
        .all(|f| f.data.is_empty()));
}

#[test]
fn test_power_cycle_restores_configuration() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.set_speed_mode(1.0, 0.5, 0.0, SourceMode::QuadEncoder(360))
        .unwrap();
    mc.enable_control(0.0).unwrap();
    converge(&mut mc, 10);
    let p = codec::encode_fxp16_16(1.0).to_le_bytes().to_vec();
    assert_eq!(Some(p.clone()), sim.register(5, api::speed::P));

    sim.power_cycle(5);
    assert_eq!(Some(vec![0; 4]), sim.register(5, api::speed::P));
    sim.clear_sent();

    mc.verify().unwrap();
    assert!(!mc.all_verified());
    assert!(!mc.is_verified(FieldId::P));
    assert!(!mc.is_verified(FieldId::FaultTime));
    // Ramp rate does not apply in speed mode
    assert!(mc.is_verified(FieldId::VoltageRampRate));
    // The power flag was acknowledged
    assert!(sim
        .sent_to(api::status::POWER, 5)
        .iter()
        .any(|f| f.data == vec![1]));
    assert!(!sim.device(5).unwrap().power_flag);

    converge(&mut mc, 10);
    assert_eq!(Some(p), sim.register(5, api::speed::P));
    assert_eq!(
        Some(vec![reference::QUAD_ENCODER]),
        sim.register(5, api::speed::REFERENCE)
    );
    assert_eq!(
        Some(360i16.to_le_bytes().to_vec()),
        sim.register(5, api::config::ENCODER_LINES)
    );
    let device = sim.device(5).unwrap();
    assert_eq!(ControlMode::Speed, device.mode);
    assert!(device.enabled);
    assert!(mc.status().all_received());
}

#[test]
fn test_control_mode_only_checked_while_enabled() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);
    mc.set_current_mode(1.0, 0.0, 0.0, SourceMode::None).unwrap();
    assert!(!mc.is_enabled());

    converge(&mut mc, 10);
    // Everything else verified, but the mode is still pending
    assert!(!mc.is_verified(FieldId::ControlMode));
    assert!(sim.sent_to(api::status::CONTROL_MODE, 5).is_empty());

    mc.enable_control(0.0).unwrap();
    converge(&mut mc, 10);
    assert!(mc.is_verified(FieldId::ControlMode));
    assert_eq!(ControlMode::Current, sim.device(5).unwrap().mode);
}

#[test]
fn test_source_selection() {
    let (_sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);

    mc.set_speed_mode(0.1, 0.0, 0.0, SourceMode::Encoder(100))
        .unwrap();
    assert_eq!(ReferenceSource::Encoder, mc.speed_reference());
    assert_eq!(ReferenceSource::None, mc.position_reference());
    assert_eq!(100, mc.encoder_codes_per_rev());

    mc.set_current_mode(0.1, 0.0, 0.0, SourceMode::Encoder(100))
        .unwrap();
    assert_eq!(ReferenceSource::None, mc.speed_reference());

    mc.set_position_mode(0.1, 0.0, 0.0, SourceMode::Potentiometer)
        .unwrap();
    assert_eq!(ReferenceSource::Potentiometer, mc.position_reference());
    assert_eq!(1, mc.potentiometer_turns());

    assert!(matches!(
        mc.set_position_mode(0.1, 0.0, 0.0, SourceMode::Encoder(100)),
        Err(MotorControllerError::InvalidOperation { .. })
    ));
    // The rejected call changed nothing
    assert_eq!(ControlMode::Position, mc.control_mode());
}

#[test]
fn test_ramp_rate_encoding_per_mode() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);

    mc.set_max_output_voltage(10.0).unwrap();
    mc.set_voltage_ramp_rate(6.0).unwrap();
    let frames = sim.sent_to(api::voltage::SET_RAMP, 5);
    let expected = codec::encode_percentage(6.0 / 10_000.0).to_le_bytes().to_vec();
    assert_eq!(expected, frames.last().unwrap().data);

    mc.set_voltage_mode(SourceMode::None).unwrap();
    mc.set_voltage_ramp_rate(2.0).unwrap();
    let frames = sim.sent_to(api::voltage_comp::COMP_RAMP, 5);
    let expected = codec::encode_fxp8_8(0.002).to_le_bytes().to_vec();
    assert_eq!(expected, frames.last().unwrap().data);
    assert_eq!(2.0, mc.voltage_ramp_rate().unwrap());

    mc.set_speed_mode(0.0, 0.0, 0.0, SourceMode::None).unwrap();
    assert!(matches!(
        mc.set_voltage_ramp_rate(1.0),
        Err(MotorControllerError::InvalidOperation { .. })
    ));
}

#[test]
fn test_fault_time_and_soft_limits() {
    let (sim, _clock, bus) = setup(&[5]);
    let mut mc = open(&bus, 5);

    mc.set_fault_time(10.0).unwrap();
    assert_eq!(3.0, mc.fault_time());
    assert_eq!(
        vec![0xb8, 0x0b],
        sim.sent_to(api::config::FAULT_TIME, 5).last().unwrap().data
    );
    mc.set_fault_time(0.1).unwrap();
    assert_eq!(0.5, mc.fault_time());
    assert_eq!(Some(vec![0xf4, 0x01]), sim.register(5, api::config::FAULT_TIME));

    mc.config_soft_position_limits(2.5, -1.0).unwrap();
    assert_eq!(Some(vec![1]), sim.register(5, api::config::LIMIT_MODE));
    assert_eq!(
        Some(vec![0x00, 0x80, 0x02, 0x00, 0x01]),
        sim.register(5, api::config::LIMIT_FORWARD)
    );
    assert_eq!(
        Some(vec![0x00, 0x00, 0xff, 0xff, 0x01]),
        sim.register(5, api::config::LIMIT_REVERSE)
    );
    assert_eq!(2.5, mc.forward_limit());
    assert_eq!(-1.0, mc.reverse_limit());

    mc.disable_soft_position_limits().unwrap();
    assert_eq!(Some(vec![0]), sim.register(5, api::config::LIMIT_MODE));
    converge(&mut mc, 10);
}
