//! Device handler end to end: config in, region out, commands through

use rtlink_common::cancel::CancellationToken;
use rtlink_common::config::{RegionConfig, SharedConfig, GamepadConfig, LogLevel};
use rtlink_common::device::{DeviceStatus, DeviceType};
use rtlink_common::value::Value;
use rtlink_dev_handler::{DevHandlerConfig, DeviceEntry, DeviceHandler, HandlerError};
use rtlink_shm::{RegionHandle, ShmError};
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir, name: &str) -> DevHandlerConfig {
    let mut region = RegionConfig::named(dir.path(), name);
    region.capacity = 4;
    region.liveness_interval_ms = 10;
    region.stale_after_ms = 200;
    region.device_stale_timeout_ms = 100;
    DevHandlerConfig {
        shared: SharedConfig {
            log_level: LogLevel::Debug,
            service_name: "dev-handler-test".to_string(),
        },
        region,
        gamepad: GamepadConfig::default(),
        cycle_time_us: 1_000,
        devices: vec![
            DeviceEntry {
                id: "drive".to_string(),
                device_type: DeviceType::MotorController,
            },
            DeviceEntry {
                id: "counter".to_string(),
                device_type: DeviceType::SimpleTestDevice,
            },
        ],
    }
}

#[test]
fn test_configured_devices_are_visible() {
    let dir = TempDir::new().unwrap();
    let handler = DeviceHandler::new(config(&dir, "visible")).unwrap();
    let client = RegionHandle::attach_in(dir.path(), "visible").unwrap();

    let listed: Vec<_> = client
        .list_devices()
        .map(|d| (d.device_id.to_string(), d.status))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("drive".to_string(), DeviceStatus::Connected),
            ("counter".to_string(), DeviceStatus::Connected),
        ]
    );
    assert_eq!(handler.devices().len(), 2);
}

#[test]
fn test_second_handler_refused() {
    let dir = TempDir::new().unwrap();
    let _first = DeviceHandler::new(config(&dir, "single")).unwrap();
    assert!(matches!(
        DeviceHandler::new(config(&dir, "single")),
        Err(HandlerError::Shm(ShmError::RegionExists { .. }))
    ));
}

#[test]
fn test_cycles_publish_and_forward_commands() {
    let dir = TempDir::new().unwrap();
    let mut handler = DeviceHandler::new(config(&dir, "cycle")).unwrap();
    let client = RegionHandle::attach_in(dir.path(), "cycle").unwrap();

    handler.cycle(Duration::from_millis(1)).unwrap();
    assert_eq!(client.get_value("counter", "increasing").unwrap(), Value::Int(1));

    client.set_value("drive", "speed", Value::Float(1.0)).unwrap();
    assert_ne!(client.pending_devices(), 0);
    handler.cycle(Duration::from_millis(100)).unwrap();
    assert_eq!(client.pending_devices(), 0);
    assert_eq!(
        handler.devices()[0].command("speed"),
        Some(Value::Float(1.0))
    );
    assert_eq!(client.get_value("drive", "enc_pos").unwrap(), Value::Int(100));
    assert_eq!(client.get_value("counter", "increasing").unwrap(), Value::Int(2));
}

#[test]
fn test_idle_handler_goes_stale_for_clients() {
    let dir = TempDir::new().unwrap();
    let mut handler = DeviceHandler::new(config(&dir, "idle")).unwrap();
    let client = RegionHandle::attach_in(dir.path(), "idle").unwrap();
    for _ in 0..5 {
        handler.cycle(Duration::from_millis(1)).unwrap();
    }
    assert_eq!(client.get_value("counter", "increasing").unwrap(), Value::Int(5));

    // Devices miss their window while the region itself stays fresh.
    std::thread::sleep(Duration::from_millis(150));
    handler.region().refresh_liveness();
    assert!(matches!(
        client.get_value("counter", "increasing"),
        Err(ShmError::DeviceDisconnected { .. })
    ));
    assert!(matches!(
        client.set_value("drive", "speed", Value::Float(0.5)),
        Err(ShmError::DeviceDisconnected { .. })
    ));
    let statuses: Vec<_> = client.list_devices().map(|d| d.status).collect();
    assert_eq!(statuses, vec![DeviceStatus::Stale, DeviceStatus::Stale]);

    // Then the region misses its own window.
    std::thread::sleep(Duration::from_millis(250));
    assert!(matches!(
        client.get_value("counter", "increasing"),
        Err(ShmError::RegionStale { .. })
    ));
    assert!(matches!(
        client.set_value("drive", "speed", Value::Float(0.5)),
        Err(ShmError::RegionStale { .. })
    ));

    // One cycle brings both back.
    handler.cycle(Duration::from_millis(1)).unwrap();
    assert_eq!(client.get_value("counter", "increasing").unwrap(), Value::Int(6));
    client.set_value("drive", "speed", Value::Float(0.5)).unwrap();
}

#[test]
fn test_hotplug_through_handler() {
    let dir = TempDir::new().unwrap();
    let mut handler = DeviceHandler::new(config(&dir, "hotplug")).unwrap();
    let client = RegionHandle::attach_in(dir.path(), "hotplug").unwrap();

    handler
        .connect_device("arm", DeviceType::ServoControl)
        .unwrap();
    client.set_value("arm", "servo0", Value::Float(0.3)).unwrap();
    handler.cycle(Duration::from_millis(1)).unwrap();

    handler.disconnect_device("arm").unwrap();
    assert!(matches!(
        client.get_value("arm", "servo0"),
        Err(ShmError::DeviceNotFound { .. })
    ));
    assert!(matches!(
        handler.disconnect_device("arm"),
        Err(HandlerError::UnknownDevice(_))
    ));
    handler.cycle(Duration::from_millis(1)).unwrap();
}

#[test]
fn test_run_keeps_region_alive_until_cancelled() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, "alive");
    let mut handler = DeviceHandler::new(cfg.clone()).unwrap();
    let cancel = CancellationToken::new();

    std::thread::scope(|s| {
        let stopper = cancel.clone();
        s.spawn(move || {
            // Longer than both stale windows.
            std::thread::sleep(Duration::from_millis(400));
            let client = RegionHandle::attach(&cfg.region).unwrap();
            assert!(client.health().is_ok());
            assert_eq!(client.get_value("drive", "speed").unwrap(), Value::Float(0.0));
            stopper.cancel();
        });
        handler.run(&cancel).unwrap();
    });

    let stats = handler.stats();
    assert!(stats.cycle_count > 0);
    assert!(stats.max_cycle_time_us >= stats.avg_cycle_time_us());

    handler.shutdown().unwrap();
    assert!(matches!(
        RegionHandle::attach_in(dir.path(), "alive"),
        Err(ShmError::RegionNotFound { .. })
    ));
}
