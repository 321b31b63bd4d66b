use std::sync::{Arc, Mutex};
use atc_ota_lib::ble::mock::{MockCentral, MockDevice};
use atc_ota_lib::ble::uuids;
use atc_ota_lib::config::OtaSettings;
use atc_ota_lib::device::MacAddress;
use atc_ota_lib::ota::OtaEngine;

fn mac() -> MacAddress {
    MacAddress::parse("A4:C1:38:AA:BB:CC").unwrap()
}

fn settings() -> OtaSettings {
    OtaSettings {
        chunk_delay_ms: 1,
        command_delay_ms: 1,
        ..OtaSettings::default()
    }
}

#[tokio::test]
async fn test_progress_reported_per_chunk() {
    let central = Arc::new(MockCentral::new());
    central.add_device(mac(), MockDevice::connectable()).await;
    let engine = OtaEngine::new(central.clone(), settings());

    let calls = Mutex::new(Vec::new());
    let on_progress = |current: usize, total: usize| calls.lock().unwrap().push((current, total));
    let firmware: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

    assert!(engine.flash(&mac(), &firmware, Some(&on_progress)).await);

    let calls = calls.into_inner().unwrap();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls.last(), Some(&(5, 5)));
    assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));

    let chunks = central.writes_to(uuids::OTA_DATA).await;
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![244, 244, 244, 244, 24]);
    assert_eq!(chunks.concat(), firmware);
}

#[tokio::test]
async fn test_unresolvable_device_writes_nothing() {
    let central = Arc::new(MockCentral::new());
    central.add_device(mac(), MockDevice::unreachable()).await;
    let engine = OtaEngine::new(central.clone(), settings());

    let called = Mutex::new(false);
    let on_progress = |_: usize, _: usize| *called.lock().unwrap() = true;

    assert!(!engine.flash(&mac(), &[0u8; 1000], Some(&on_progress)).await);

    let log = central.log().await;
    assert_eq!(log.connects, 0);
    assert!(log.writes.is_empty());
    assert!(!*called.lock().unwrap());
}

#[tokio::test]
async fn test_unknown_device_fails() {
    let central = Arc::new(MockCentral::new());
    let engine = OtaEngine::new(central.clone(), settings());

    assert!(!engine.flash(&mac(), &[0u8; 1000], None).await);
    assert_eq!(central.log().await.connects, 0);
}
