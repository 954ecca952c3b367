//! End-to-end session behaviour of the vehicle agent on the simulated network.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use car2x_core::{AgentConfig, AgentError, DenmMessage, PeerEntry, Priority, V2vMessage};
use car2x_sim::{SimVehicle, SIM_LOCAL_IP};

fn vehicle(seed: u64) -> SimVehicle {
    SimVehicle::new(seed, AgentConfig::default()).unwrap()
}

fn denm(event: &str) -> Vec<u8> {
    DenmMessage {
        event: event.into(),
        cause: "test".into(),
        severity: "low".into(),
        distance_m: None,
        speed_kmh: None,
    }
    .encode()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_without_fix_no_cam_is_ever_sent() {
    let mut v = vehicle(1);
    v.agent.start_broadcasting().unwrap();
    v.advance(Duration::from_secs(5)).await;

    assert_eq!(v.network.sent_count(), 0);
    assert!(v.sink.count_status("Status: Waiting for stable GPS...") >= 10);
    assert_eq!(v.sink.statuses()[0], "Status: Requesting GPS fix...");

    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cam_carries_interface_address_and_reply_port() {
    let mut v = vehicle(2);
    v.agent.start_broadcasting().unwrap();
    let fix = v.fix_now(48.137, 11.575, 5.0);
    v.deliver(fix).await;
    v.advance(Duration::from_millis(500)).await;

    let sent = v.network.sent();
    assert!(!sent.is_empty());
    let [a, b, c, _] = SIM_LOCAL_IP.octets();
    assert_eq!(sent[0].target, SocketAddrV4::new(Ipv4Addr::new(a, b, c, 255), 30001));

    let cam = sent[0].cam().unwrap();
    assert_eq!(cam.ip, SIM_LOCAL_IP.to_string());
    assert_eq!(cam.denm_port, 30002);
    assert_eq!((cam.lat, cam.lon), (fix.latitude, fix.longitude));
    assert!((cam.speed_kmh - 18.0).abs() < 1e-4);
    assert_eq!(cam.vehicle_id, v.agent.vehicle_id().as_str());

    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_missing_interface_uses_limited_broadcast() {
    let mut v = vehicle(3);
    v.network.set_local_ip(None);
    v.agent.start_broadcasting().unwrap();
    v.deliver(v.fix_now(10.0, 20.0, 0.0)).await;
    v.advance(Duration::from_millis(500)).await;

    let sent = v.network.sent();
    assert_eq!(sent[0].target, SocketAddrV4::new(Ipv4Addr::BROADCAST, 30001));
    assert_eq!(sent[0].cam().unwrap().ip, "0.0.0.0");

    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_beacons_but_not_the_receiver() {
    let mut v = vehicle(4);
    v.agent.start_broadcasting().unwrap();
    v.deliver(v.fix_now(10.0, 20.0, 0.0)).await;
    v.advance(Duration::from_secs(2)).await;

    v.agent.stop_broadcasting();
    assert!(!v.agent.is_broadcasting());
    assert_eq!(v.provider.active_subscriptions(), 0);
    assert_eq!(v.sink.last_status().as_deref(), Some("Status: Stopped"));

    let sent = v.network.sent_count();
    v.advance(Duration::from_secs(3)).await;
    assert_eq!(v.network.sent_count(), sent);

    // Updates after stop never reach a filter.
    assert_eq!(v.provider.push(Priority::HighAccuracy, v.fix_now(10.0, 20.0, 0.0)), 0);

    v.network.inject(denm("after-stop"));
    v.advance(Duration::from_millis(10)).await;
    assert!(v.sink.last_warning().unwrap().contains("Event: after-stop"));

    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_forgets_previous_position() {
    let mut v = vehicle(5);
    v.agent.start_broadcasting().unwrap();
    v.deliver(v.fix_now(10.0, 20.0, 0.0)).await;
    assert!(v.agent.position().is_present());

    v.agent.stop_broadcasting();
    assert_eq!(v.agent.start_broadcasting(), Ok(()));
    assert_eq!(v.agent.start_broadcasting(), Err(AgentError::AlreadyBroadcasting));
    assert!(!v.agent.position().is_present());

    // The one-shot request picks up the provider's last fix.
    v.advance(Duration::from_millis(10)).await;
    assert!(v.agent.position().is_present());

    let peers = V2vMessage {
        vehicles: vec![PeerEntry::new("CAR9999", 10.001, 20.0, 10.0)],
    };
    v.network.inject(peers.encode().unwrap());
    v.advance(Duration::from_millis(10)).await;

    let warning = v.sink.last_warning().unwrap();
    assert!(warning.starts_with("🚗 V2V Nearby Vehicles\nTotal: 1"));
    assert!(warning.contains("\nCAR9999 | 111."));

    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_receiver_already_listening() {
    let mut v = vehicle(6);
    assert!(v.agent.is_listening());
    assert_eq!(
        v.agent.listen(v.network.clone()),
        Err(AgentError::AlreadyListening)
    );
    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_receive_loop_ends_when_network_closes() {
    let v = vehicle(7);
    v.network.inject(denm("last-words"));
    v.network.close_inbound();
    v.advance(Duration::from_millis(10)).await;

    assert_eq!(v.sink.warnings().len(), 1);
    v.agent.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fix_stream_drives_status_texts() {
    let mut v = vehicle(8);
    v.agent.start_broadcasting().unwrap();
    // Past the first beacon tick so it cannot overwrite the filter status.
    v.advance(Duration::from_millis(10)).await;

    v.deliver(v.fix_now(10.0, 20.0, 2.5)).await;
    assert_eq!(
        v.sink.last_status().as_deref(),
        Some("GPS OK (acc=4 m), v=9.0 km/h")
    );

    v.advance(Duration::from_millis(100)).await;
    let mut bad = v.fix_now(10.0, 20.0, 2.5);
    bad.accuracy = 60.0;
    v.deliver(bad).await;
    assert_eq!(
        v.sink.last_status().as_deref(),
        Some("Ignoring bad GPS (acc=60 m)")
    );

    let mut old = v.fix_now(10.0, 20.0, 2.5);
    old.timestamp -= 10_000;
    v.deliver(old).await;
    assert_eq!(v.sink.last_status().as_deref(), Some("Ignoring old GPS (4 m)"));

    v.agent.shutdown().await;
}
