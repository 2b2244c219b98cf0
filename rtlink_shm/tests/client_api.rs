//! Client get/set behaviour across independently attached handles

use rtlink_common::device::DeviceType;
use rtlink_common::gamepad::GamepadButtons;
use rtlink_common::value::{ParamType, Value};
use rtlink_shm::gamepad::GamepadSample;
use rtlink_shm::{RegionHandle, RegionOwner, ShmError};
use tempfile::TempDir;

fn setup(name: &str) -> (TempDir, RegionOwner, RegionHandle) {
    let dir = TempDir::new().unwrap();
    let owner = RegionOwner::create_in(dir.path(), name, 8).unwrap();
    let client = RegionHandle::attach_in(dir.path(), name).unwrap();
    (dir, owner, client)
}

#[test]
fn test_write_in_one_process_read_in_another() {
    let (dir, owner, writer) = setup("xproc");
    owner.add_device("drive", DeviceType::MotorController).unwrap();
    let reader = RegionHandle::attach_in(dir.path(), "xproc").unwrap();

    writer.set_value("drive", "speed", Value::Float(0.5)).unwrap();
    writer.set_value("drive", "invert", Value::Bool(true)).unwrap();
    assert_eq!(reader.get_value("drive", "speed").unwrap(), Value::Float(0.5));
    assert_eq!(reader.get_value("drive", "invert").unwrap(), Value::Bool(true));
    assert_eq!(owner.get_value("drive", "speed").unwrap(), Value::Float(0.5));
}

#[test]
fn test_sensor_published_by_owner_reaches_client() {
    let (_dir, owner, client) = setup("sensor");
    let line = owner.add_device("line", DeviceType::LineFollower).unwrap();
    owner
        .publish_value(&line, "center", Value::Float(0.82))
        .unwrap();
    assert_eq!(client.get_value("line", "center").unwrap(), Value::Float(0.82));
    assert_eq!(client.get_value("line", "left").unwrap(), Value::Float(0.0));
}

#[test]
fn test_type_mismatch_leaves_value_unchanged() {
    let (_dir, owner, client) = setup("mismatch");
    owner.add_device("drive", DeviceType::MotorController).unwrap();
    client.set_value("drive", "speed", Value::Float(0.25)).unwrap();

    let err = client
        .set_value("drive", "speed", Value::Int(1))
        .unwrap_err();
    match err {
        ShmError::TypeMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, ParamType::Float);
            assert_eq!(actual, ParamType::Int);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(client.get_value("drive", "speed").unwrap(), Value::Float(0.25));
}

#[test]
fn test_type_mismatch_checked_before_read_only() {
    let (_dir, owner, client) = setup("order");
    owner.add_device("enc", DeviceType::Encoder).unwrap();
    assert!(matches!(
        client.set_value("enc", "rotation", Value::Bool(true)),
        Err(ShmError::TypeMismatch { .. })
    ));
    assert!(matches!(
        client.set_value("enc", "rotation", Value::Int(4)),
        Err(ShmError::ReadOnlyParameter { .. })
    ));
}

#[test]
fn test_unknown_parameter_and_device() {
    let (_dir, owner, client) = setup("unknown");
    owner.add_device("servo", DeviceType::ServoControl).unwrap();

    let err = client.get_value("servo", "servo7").unwrap_err();
    assert!(matches!(err, ShmError::ParameterNotFound { .. }));
    assert!(err.is_device_level());
    assert!(matches!(
        client.set_value("servo", "speed", Value::Float(1.0)),
        Err(ShmError::ParameterNotFound { .. })
    ));
    assert!(matches!(
        client.get_value("ghost", "servo0"),
        Err(ShmError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_handle_access_skips_lookup() {
    let (_dir, owner, client) = setup("handles");
    owner.add_device("test", DeviceType::SimpleTestDevice).unwrap();
    let handle = client.device("test").unwrap();
    assert_eq!(handle.device_type(), DeviceType::SimpleTestDevice);
    assert_eq!(handle.device_id(), "test");

    for i in 0..10 {
        client.set(&handle, "my_int", Value::Int(i)).unwrap();
        assert_eq!(client.get(&handle, "my_int").unwrap(), Value::Int(i));
    }
    assert_eq!(client.get(&handle, "doubling").unwrap(), Value::Float(1.0));
}

#[test]
fn test_client_commands_drained_by_owner() {
    let (_dir, owner, client) = setup("drain");
    let servo = owner.add_device("servo", DeviceType::ServoControl).unwrap();
    client.set_value("servo", "servo1", Value::Float(-0.3)).unwrap();

    let pending = owner.take_pending_devices();
    assert_eq!(pending, 1 << servo.slot());
    let mask = owner.take_pending_commands(&servo).unwrap();
    assert!(mask.contains(1));
    assert!(!mask.contains(0));
    assert_eq!(owner.take_pending_devices(), 0);
}

#[test]
fn test_gamepad_visible_to_clients() {
    let (_dir, owner, client) = setup("pad");
    assert!(matches!(
        client.get_control("button_a"),
        Err(ShmError::DeviceDisconnected { .. })
    ));

    let sample = GamepadSample {
        buttons: GamepadButtons::BUTTON_A | GamepadButtons::DPAD_UP,
        axes: [0.5, -0.25, 3.0, 0.0],
    };
    let seq = owner.publish_gamepad(Some(&sample)).unwrap();
    assert_eq!(seq, 1);

    assert_eq!(client.get_control("button_a").unwrap(), Value::Bool(true));
    assert_eq!(client.get_control("button_b").unwrap(), Value::Bool(false));
    assert_eq!(client.get_control("dpad_up").unwrap(), Value::Bool(true));
    assert_eq!(client.get_control("joystick_left_x").unwrap(), Value::Float(0.5));
    // Out-of-range axes are clamped on publish.
    assert_eq!(client.get_control("joystick_right_x").unwrap(), Value::Float(1.0));
    assert!(matches!(
        client.get_control("paddle"),
        Err(ShmError::ParameterNotFound { .. })
    ));

    owner.publish_gamepad(None).unwrap();
    let snapshot = client.gamepad_snapshot().unwrap();
    assert!(!snapshot.connected);
    assert_eq!(snapshot.sequence, 2);
}
