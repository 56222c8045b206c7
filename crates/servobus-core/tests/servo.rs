use std::time::Duration;

use pretty_assertions::assert_eq;
use servobus_core::config::BaudRate;
use servobus_core::encoder::EncoderUnwrapper;
use servobus_core::protocol::{Bus, ProtocolError, SharedBus, StatusFlags};
use servobus_core::registers::{Model, Register};
use servobus_core::servo::{Mode, TorqueMode};
use servobus_core::sim::{SimulatedBus, SIM_MODEL_NUMBER};

fn sim_bus(addresses: &[u8]) -> Bus<SimulatedBus> {
    let mut bus = Bus::new(SimulatedBus::with_servos(Model::Sts, addresses), Model::Sts);
    bus.set_timeout(Duration::from_millis(20));
    bus
}

#[test]
fn test_ping_and_model_number() {
    let mut bus = sim_bus(&[1]);
    assert!(bus.ping(1).unwrap().flags().is_ok());

    let register = bus.register(Register::ModelNumber).unwrap();
    assert_eq!(bus.read_u16(1, register).unwrap(), SIM_MODEL_NUMBER);
}

#[test]
fn test_missing_servo_times_out() {
    let mut bus = sim_bus(&[1]);
    let err = bus.ping(2).unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.code(), "bus_timeout");
}

#[test]
fn test_move_and_read_back() {
    let mut bus = sim_bus(&[1]);
    bus.move_to_position(1, 1000, 500, 20).unwrap();
    let sample = bus.read_position(1).unwrap();
    assert_eq!(sample.position, 1000);

    let memory = bus.transport().memory(1, 0x29, 7).unwrap();
    assert_eq!(memory, vec![20, 0xE8, 0x03, 0, 0, 0xF4, 0x01]);
}

#[test]
fn test_sync_move_and_sync_read() {
    let mut bus = sim_bus(&[1, 2, 3]);
    bus.sync_move_to_position(&[1, 2, 3], &[100, 200, 300], 800, 10)
        .unwrap();

    let samples = bus.sync_read_positions(&[1, 2, 3]).unwrap();
    let positions: Vec<(u8, u16)> = samples.iter().map(|(&a, s)| (a, s.position)).collect();
    assert_eq!(positions, vec![(1, 100), (2, 200), (3, 300)]);
}

#[test]
fn test_sync_read_skips_silent_servo() {
    let mut bus = sim_bus(&[3, 4, 5]);
    bus.transport_mut().set_responsive(4, false);

    let samples = bus.sync_read_positions(&[3, 4, 5]).unwrap();
    assert_eq!(samples.keys().copied().collect::<Vec<_>>(), vec![3, 5]);
}

#[test]
fn test_sync_read_all_silent() {
    let mut bus = sim_bus(&[3]);
    bus.transport_mut().set_responsive(3, false);
    assert!(bus.sync_read_positions(&[3]).is_err());
}

#[test]
fn test_staged_writes_wait_for_action() {
    let mut bus = sim_bus(&[1, 2]);
    let torque = bus.register(Register::TorqueSwitch).unwrap();
    bus.reg_write(1, torque, &[0]).unwrap();
    bus.reg_write(2, torque, &[0]).unwrap();
    assert_eq!(bus.read_u8(1, torque).unwrap(), 1);

    bus.action().unwrap();
    assert_eq!(bus.read_u8(1, torque).unwrap(), 0);
    assert_eq!(bus.read_u8(2, torque).unwrap(), 0);
}

#[test]
fn test_change_id() {
    let mut bus = sim_bus(&[1]);
    bus.change_id(1, 12).unwrap();

    assert!(bus.ping(1).is_err());
    assert!(bus.ping(12).is_ok());
    let lock = bus.register(Register::EpromLock).unwrap();
    assert_eq!(bus.read_u8(12, lock).unwrap(), 1);
}

#[test]
fn test_position_correction_round_trip() {
    let mut bus = sim_bus(&[1]);
    bus.set_position_correction(1, -1500, true).unwrap();
    assert_eq!(bus.get_position_correction(1).unwrap(), -1500);

    // Without unlocking, the locked EPROM keeps the saved value
    bus.set_position_correction(1, 300, false).unwrap();
    assert_eq!(bus.get_position_correction(1).unwrap(), -1500);
}

#[test]
fn test_wide_correction_register_is_reported() {
    let mut bus = sim_bus(&[1]);
    for raw in [[0x00u8, 0x88], [0xFF, 0xFF]] {
        bus.transport_mut().poke(1, 0x1F, &raw);
        let err = bus.get_position_correction(1).unwrap_err();
        assert!(matches!(err, ProtocolError::RangeError { .. }));
        assert_eq!(err.code(), "range_error");
    }
}

#[test]
fn test_sync_acceleration() {
    let mut bus = sim_bus(&[1, 2, 3]);
    bus.sync_set_acceleration(&[1, 2, 3], &[10, 50, 254]).unwrap();

    let values = bus.sync_read_acceleration(&[1, 2, 3]).unwrap();
    assert_eq!(
        values.into_iter().collect::<Vec<_>>(),
        vec![(1, 10), (2, 50), (3, 254)]
    );

    bus.transport_mut().set_responsive(2, false);
    let values = bus.sync_read_acceleration(&[1, 2, 3]).unwrap();
    assert_eq!(values.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
}

#[test]
fn test_sync_acceleration_rejects_bad_input() {
    let mut bus = sim_bus(&[1, 2]);
    let err = bus.sync_set_acceleration(&[1, 2], &[10, 255]).unwrap_err();
    assert!(matches!(err, ProtocolError::RangeError { value: 255, .. }));

    let err = bus.sync_set_acceleration(&[1, 2], &[10]).unwrap_err();
    assert!(matches!(err, ProtocolError::ArityMismatch(_)));
    assert_eq!(bus.transport().memory(1, 0x29, 1).unwrap(), vec![0]);
}

#[test]
fn test_mode_and_torque() {
    let mut bus = sim_bus(&[1]);
    bus.set_mode(1, Mode::Wheel).unwrap();
    assert_eq!(bus.get_mode(1).unwrap(), Mode::Wheel);

    bus.set_torque_mode(1, TorqueMode::Damped).unwrap();
    let torque = bus.register(Register::TorqueSwitch).unwrap();
    assert_eq!(bus.read_u8(1, torque).unwrap(), 2);
}

#[test]
fn test_baud_rate_saved() {
    let mut bus = sim_bus(&[1]);
    bus.set_baud_rate(1, BaudRate::B500K).unwrap();
    let register = bus.register(Register::BaudRate).unwrap();
    assert_eq!(bus.read_u8(1, register).unwrap(), 1);
}

#[test]
fn test_read_status() {
    let mut bus = sim_bus(&[1]);
    let status = bus.read_status(1).unwrap();
    assert_eq!(status.position, 2048);
    assert_eq!(status.voltage, 120);
    assert_eq!(status.volts(), 12.0);
    assert_eq!(status.temperature, 30);
    assert!(!status.moving);
}

#[test]
fn test_status_flags_reported() {
    let mut bus = sim_bus(&[1]);
    bus.transport_mut()
        .set_status(1, StatusFlags::OVERHEAT | StatusFlags::OVERLOAD);
    let flags = bus.ping(1).unwrap().flags();
    assert!(flags.overheat());
    assert!(flags.overload());
    assert!(!flags.voltage());
}

#[test]
fn test_scs_model() {
    let mut bus = Bus::new(SimulatedBus::with_servos(Model::Scs, &[1]), Model::Scs);
    bus.set_timeout(Duration::from_millis(20));

    assert!(bus.ping(1).is_ok());
    assert!(matches!(
        bus.read_position(1),
        Err(ProtocolError::UnsupportedOnModel { .. })
    ));
    assert!(matches!(
        bus.get_position_correction(1),
        Err(ProtocolError::UnsupportedOnModel { .. })
    ));
}

#[test]
fn test_encoder_follows_sim_positions() {
    let mut bus = sim_bus(&[1]);
    let mut encoder = EncoderUnwrapper::default();

    for target in [4000u16, 100, 1200, 2300] {
        bus.move_to_position(1, target, 0, 0).unwrap();
        encoder.update(bus.read_position(1).unwrap().position);
    }
    // 4000 -> 100 wraps forward by 196, then +1100 twice
    assert_eq!(encoder.position(), 196 + 1100 + 1100);
}

#[test]
fn test_jitter_stays_near_target() {
    let sim = SimulatedBus::with_servos(Model::Sts, &[1]).with_jitter(7, 3);
    let mut bus = Bus::new(sim, Model::Sts);
    bus.set_timeout(Duration::from_millis(20));

    for _ in 0..10 {
        let position = bus.read_position(1).unwrap().position;
        assert!((2045..=2051).contains(&position));
    }
}

#[test]
fn test_shared_bus_with_sim() {
    let shared = SharedBus::new(sim_bus(&[1, 2]));
    let handles: Vec<_> = [1u8, 2]
        .into_iter()
        .map(|address| {
            let bus = shared.clone();
            std::thread::spawn(move || {
                bus.with(|b| {
                    b.move_to_position(address, 500 * address as u16, 0, 0)?;
                    b.read_position(address)
                })
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    let positions = shared.with(|b| b.sync_read_positions(&[1, 2])).unwrap();
    assert_eq!(positions[&1].position, 500);
    assert_eq!(positions[&2].position, 1000);
}
