//! Device table tests: capacity, duplicates, lifecycle, listing, staleness

use rtlink_common::device::{DeviceStatus, DeviceType};
use rtlink_common::value::Value;
use rtlink_shm::{RegionHandle, RegionOwner, ShmError};
use std::time::Duration;
use tempfile::TempDir;

fn region(dir: &TempDir, name: &str, capacity: usize) -> RegionOwner {
    RegionOwner::create_in(dir.path(), name, capacity).unwrap()
}

#[test]
fn test_capacity_four_plus_one() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "cap", 4);
    for i in 0..4 {
        owner
            .add_device(&format!("dev{i}"), DeviceType::LimitSwitch)
            .unwrap();
    }
    let err = owner.add_device("dev4", DeviceType::LimitSwitch).unwrap_err();
    assert!(matches!(err, ShmError::CapacityExceeded { capacity: 4 }));
    assert!(err.is_device_level());

    for i in 0..4 {
        assert_eq!(
            owner.get_value(&format!("dev{i}"), "switch1").unwrap(),
            Value::Bool(false)
        );
    }
}

#[test]
fn test_duplicate_id_rejected() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "dup", 4);
    owner.add_device("motor", DeviceType::MotorController).unwrap();
    assert!(matches!(
        owner.add_device("motor", DeviceType::Encoder),
        Err(ShmError::DuplicateDevice { .. })
    ));
}

#[test]
fn test_invalid_ids() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "ids", 1);
    assert!(matches!(
        owner.add_device("", DeviceType::Encoder),
        Err(ShmError::InvalidDeviceId(_))
    ));
    let long = "x".repeat(33);
    assert!(matches!(
        owner.add_device(&long, DeviceType::Encoder),
        Err(ShmError::InvalidDeviceId(_))
    ));
    let max = "y".repeat(32);
    owner.add_device(&max, DeviceType::Encoder).unwrap();
    assert!(owner.get_value(&max, "rotation").is_ok());
}

#[test]
fn test_removed_device_is_gone_for_good() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "life", 2);
    let client = RegionHandle::attach_in(dir.path(), "life").unwrap();

    owner.add_device("servo", DeviceType::ServoControl).unwrap();
    client
        .set_value("servo", "servo0", Value::Float(0.75))
        .unwrap();
    let old = client.device("servo").unwrap();

    owner.remove_device("servo").unwrap();
    for _ in 0..3 {
        assert!(matches!(
            client.get_value("servo", "servo0"),
            Err(ShmError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            client.get(&old, "servo0"),
            Err(ShmError::DeviceNotFound { .. })
        ));
    }
    assert!(matches!(
        owner.remove_device("servo"),
        Err(ShmError::DeviceNotFound { .. })
    ));

    // Same id again is a new instance with fresh defaults; the old handle stays dead.
    owner.add_device("servo", DeviceType::ServoControl).unwrap();
    assert_eq!(
        client.get_value("servo", "servo0").unwrap(),
        Value::Float(0.0)
    );
    assert!(matches!(
        client.get(&old, "servo0"),
        Err(ShmError::DeviceNotFound { .. })
    ));
}

#[test]
fn test_listing_is_lazy_and_restartable() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "list", 4);
    owner.add_device("a", DeviceType::Encoder).unwrap();
    owner.add_device("b", DeviceType::LineFollower).unwrap();
    owner.add_device("c", DeviceType::Potentiometer).unwrap();
    owner.remove_device("b").unwrap();

    let client = RegionHandle::attach_in(dir.path(), "list").unwrap();
    let listed: Vec<_> = client
        .list_devices()
        .map(|d| (d.device_id.to_string(), d.device_type, d.status))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("a".to_string(), DeviceType::Encoder, DeviceStatus::Connected),
            ("b".to_string(), DeviceType::LineFollower, DeviceStatus::Disconnected),
            ("c".to_string(), DeviceType::Potentiometer, DeviceStatus::Connected),
        ]
    );

    // A structural change mid-iteration is fine.
    let mut iter = client.list_devices();
    assert_eq!(iter.next().unwrap().device_id.as_str(), "a");
    owner.add_device("d", DeviceType::Encoder).unwrap();
    let rest: Vec<_> = iter.map(|d| d.device_id.to_string()).collect();
    assert_eq!(rest, vec!["b", "c", "d"]);

    // Restart sees the new state: the free slot 3 was preferred over reusing b's.
    assert_eq!(client.list_devices().count(), 4);
    owner.add_device("e", DeviceType::Encoder).unwrap();
    let ids: Vec<_> = client
        .list_devices()
        .map(|d| d.device_id.to_string())
        .collect();
    assert_eq!(ids, vec!["a", "e", "c", "d"]);
}

#[test]
fn test_stale_sweep_and_touch() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "stale", 2);
    let enc = owner.add_device("enc", DeviceType::Encoder).unwrap();
    let fresh = owner.add_device("fresh", DeviceType::Encoder).unwrap();

    std::thread::sleep(Duration::from_millis(60));
    owner.touch_device(&fresh).unwrap();
    assert_eq!(owner.sweep_stale_devices(Duration::from_millis(30)), 1);
    assert_eq!(owner.sweep_stale_devices(Duration::from_millis(30)), 0);

    let err = owner.get_value("enc", "rotation").unwrap_err();
    assert!(matches!(err, ShmError::DeviceDisconnected { .. }));
    assert!(err.is_device_level());
    assert!(owner.get_value("fresh", "rotation").is_ok());

    // The handler may still publish while stale, then reconnect.
    owner.publish_value(&enc, "rotation", Value::Int(12)).unwrap();
    owner.touch_device(&enc).unwrap();
    assert_eq!(owner.get_value("enc", "rotation").unwrap(), Value::Int(12));

    let status = owner
        .list_devices()
        .find(|d| d.device_id.as_str() == "enc")
        .unwrap()
        .status;
    assert_eq!(status, DeviceStatus::Connected);
}

#[test]
fn test_stale_device_still_counts_as_duplicate() {
    let dir = TempDir::new().unwrap();
    let owner = region(&dir, "stale_dup", 2);
    owner.add_device("enc", DeviceType::Encoder).unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(owner.sweep_stale_devices(Duration::from_millis(5)), 1);
    assert!(matches!(
        owner.add_device("enc", DeviceType::Encoder),
        Err(ShmError::DuplicateDevice { .. })
    ));
    owner.remove_device("enc").unwrap();
}
