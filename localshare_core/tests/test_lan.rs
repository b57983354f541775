use localshare_core::lan::{LanEventSource, LanSettings};
use localshare_core::{
    ConnectConfig, ConnectionEventSource, ConnectionInfo, DeviceStatus, P2pEvent, P2pFailure,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::sync::mpsc;

fn lan_settings(name: &str, broadcast_port: u16, group_owner_intent: u8) -> LanSettings {
    LanSettings {
        device_name: name.to_string(),
        discovery_port: 0,
        broadcast_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, broadcast_port)),
        group_owner_intent,
    }
}

async fn wait_for(
    rx: &mut mpsc::Receiver<P2pEvent>,
    matches: impl Fn(&P2pEvent) -> bool,
) -> P2pEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event source went away"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_discover_connect_and_leave_over_loopback() {
    let (tx_tablet, mut rx_tablet) = mpsc::channel(100);
    // The tablet never announces in this test, so its target does not matter
    let tablet = LanEventSource::new(lan_settings("tablet", 9, 15), tx_tablet);
    tablet.initialize().await.unwrap();
    let tablet_port = tablet.local_port().await.unwrap();

    let (tx_phone, mut rx_phone) = mpsc::channel(100);
    let phone = LanEventSource::new(lan_settings("phone", tablet_port, 0), tx_phone);
    phone.initialize().await.unwrap();

    assert_eq!(rx_phone.recv().await, Some(P2pEvent::RadioStateChanged(true)));
    match rx_phone.recv().await {
        Some(P2pEvent::LocalDeviceChanged(device)) => {
            assert_eq!(device.display_name, "phone");
            assert_eq!(device.address, phone.device_id());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Stray traffic on the discovery port is ignored
    let stray = tokio::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    stray
        .send_to(b"not for us", (Ipv4Addr::LOCALHOST, tablet_port))
        .await
        .unwrap();

    phone.discover_peers().await.unwrap();
    wait_for(&mut rx_tablet, |e| *e == P2pEvent::PeersChanged).await;
    wait_for(&mut rx_phone, |e| *e == P2pEvent::PeersChanged).await;

    let seen_by_tablet = tablet.request_peers().await.unwrap();
    assert_eq!(seen_by_tablet.len(), 1);
    assert_eq!(seen_by_tablet[0].display_name, "phone");

    let seen_by_phone = phone.request_peers().await.unwrap();
    assert_eq!(seen_by_phone.len(), 1);
    assert_eq!(seen_by_phone[0].display_name, "tablet");
    assert_eq!(seen_by_phone[0].status, DeviceStatus::Available);

    phone
        .connect(tablet.device_id(), ConnectConfig::PushButton)
        .await
        .unwrap();
    wait_for(&mut rx_tablet, |e| *e == P2pEvent::ConnectionChanged(true)).await;
    wait_for(&mut rx_phone, |e| *e == P2pEvent::ConnectionChanged(true)).await;
    assert_eq!(
        phone.request_peers().await.unwrap()[0].status,
        DeviceStatus::Connected
    );

    // The tablet asked harder to own the group
    phone.request_connection_info().await.unwrap();
    let info = wait_for(&mut rx_phone, |e| {
        matches!(e, P2pEvent::ConnectionInfoAvailable(_))
    })
    .await;
    assert_eq!(
        info,
        P2pEvent::ConnectionInfoAvailable(ConnectionInfo {
            group_formed: true,
            is_group_owner: false,
            group_owner_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        })
    );

    tablet.request_connection_info().await.unwrap();
    match wait_for(&mut rx_tablet, |e| {
        matches!(e, P2pEvent::ConnectionInfoAvailable(_))
    })
    .await
    {
        P2pEvent::ConnectionInfoAvailable(info) => {
            assert!(info.group_formed);
            assert!(info.is_group_owner);
        }
        other => panic!("unexpected event {:?}", other),
    }

    tablet.remove_group().await.unwrap();
    wait_for(&mut rx_phone, |e| *e == P2pEvent::ConnectionChanged(false)).await;
    assert_eq!(
        phone.request_peers().await.unwrap()[0].status,
        DeviceStatus::Available
    );

    // Nothing left to leave
    assert_eq!(tablet.remove_group().await, Err(P2pFailure::Busy));

    phone.close().await;
    tablet.close().await;
    assert_eq!(phone.discover_peers().await, Err(P2pFailure::Busy));
}

#[tokio::test]
async fn test_connect_to_unknown_device_fails() {
    let (tx, _rx) = mpsc::channel(100);
    let source = LanEventSource::new(lan_settings("phone", 9, 7), tx);
    source.initialize().await.unwrap();

    assert_eq!(
        source
            .connect("no-such-device", ConnectConfig::PushButton)
            .await,
        Err(P2pFailure::Internal)
    );
    source.close().await;
}

#[tokio::test]
async fn test_requests_before_initialize_are_refused() {
    let (tx, _rx) = mpsc::channel(100);
    let source = LanEventSource::new(LanSettings::default(), tx);

    assert_eq!(source.discover_peers().await, Err(P2pFailure::Busy));
    assert!(source.request_peers().await.unwrap().is_empty());
    assert_eq!(source.local_port().await, None);
}
