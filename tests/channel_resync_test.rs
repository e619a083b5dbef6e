//! Output channel re-synchronization.
//!
//! Selecting a channel must read back exactly the mode, hardware type and range of
//! the new channel, in that order, and publish them together with the selector.

use cn8pt_bridge::bridge::Cn8ptBridge;
use cn8pt_bridge::point::{ChannelConfig, PointId, PointStatus, PointValue};
use cn8pt_bridge::sim::SimulatedCn8pt;
use cn8pt_bridge::transport::{MockConnector, Session};
use cn8pt_bridge::BridgeError;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn synced_bridge() -> (SimulatedCn8pt, MockConnector, Cn8ptBridge) {
    let device = SimulatedCn8pt::new();
    let connector = device.connector();
    let bridge = Cn8ptBridge::new(Arc::new(Session::new(connector.clone())));
    assert_ok!(bridge.enable_echo().await);
    assert_ok!(bridge.startup(PointId::OutputChan).await);
    connector.clear();
    (device, connector, bridge)
}

#[tokio::test]
async fn selector_write_issues_exactly_three_reads() {
    let (_device, connector, bridge) = synced_bridge().await;

    assert_ok!(bridge.write(PointId::OutputChan, PointValue::Integer(1)).await);

    assert_eq!(connector.requests(), vec!["R600 1", "G601 1", "R660 1"]);
}

#[tokio::test]
async fn triple_is_published_with_selector() {
    let (_device, _connector, bridge) = synced_bridge().await;
    let registry = bridge.registry().clone();
    let mut channel_rx = registry.subscribe_channel();
    let _ = channel_rx.borrow_and_update();

    assert_ok!(bridge.write(PointId::OutputChan, PointValue::Integer(1)).await);

    assert!(channel_rx.has_changed().unwrap());
    let config = channel_rx.borrow_and_update().clone();
    assert_eq!(
        config,
        ChannelConfig {
            channel: 1,
            mode: 1,
            range: 0,
            output_type: "Single Poll Relay".into(),
        }
    );
    assert_eq!(registry.value(PointId::OutputChan), PointValue::Integer(1));
    assert_eq!(registry.value(PointId::OutputMode), PointValue::Enum(1));
    assert_eq!(registry.value(PointId::OutputRange), PointValue::Enum(0));
}

#[tokio::test]
async fn mode_write_targets_selected_channel() {
    let (device, connector, bridge) = synced_bridge().await;

    assert_ok!(bridge.write(PointId::OutputChan, PointValue::Integer(5)).await);
    assert_ok!(bridge.write(PointId::OutputMode, PointValue::Enum(2)).await);

    assert_eq!(connector.requests().last().unwrap(), "W600 52");
    assert_eq!(device.channel(5).unwrap().mode, 2);
    assert_eq!(device.channel(3).unwrap().mode, 1);
}

#[tokio::test]
async fn invalid_channel_sends_nothing() {
    let (_device, connector, bridge) = synced_bridge().await;

    let err = assert_err!(bridge.write(PointId::OutputChan, PointValue::Integer(0)).await);
    assert!(matches!(err, BridgeError::InvalidValue { .. }));
    assert!(connector.requests().is_empty());
    assert_eq!(bridge.registry().channel().channel, 3);
}

#[tokio::test]
async fn lost_device_keeps_previous_channel() {
    let (_device, connector, bridge) = synced_bridge().await;
    let before = bridge.registry().channel();
    let status_before = bridge.registry().status(PointId::OutputMode);
    connector.set_refusing(true);

    assert_err!(bridge.write(PointId::OutputChan, PointValue::Integer(2)).await);

    assert_eq!(bridge.registry().channel(), before);
    assert_eq!(bridge.registry().status(PointId::OutputMode), status_before);
    assert!(matches!(status_before, PointStatus::Synchronized { .. }));
}

#[tokio::test]
async fn mode_write_during_selection_stays_on_one_channel() {
    let device = SimulatedCn8pt::new();
    let connector = device.connector().with_delay(Duration::from_millis(20));
    let bridge = Arc::new(Cn8ptBridge::new(Arc::new(Session::new(connector.clone()))));
    assert_ok!(bridge.enable_echo().await);
    assert_ok!(bridge.startup(PointId::OutputChan).await);
    connector.clear();

    let selecting = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.select_channel(1).await }
    });
    // land the mode write while the selection is still reading back
    tokio::time::sleep(Duration::from_millis(50)).await;
    let writing = tokio::spawn({
        let bridge = bridge.clone();
        async move { bridge.write(PointId::OutputMode, PointValue::Enum(5)).await }
    });
    assert_ok!(assert_ok!(selecting.await));
    assert_ok!(assert_ok!(writing.await));

    assert_eq!(
        connector.requests(),
        vec!["R600 1", "G601 1", "R660 1", "W600 15"]
    );
    let config = bridge.registry().channel();
    assert_eq!(config.channel, 1);
    assert_eq!(config.mode, 5);
    assert_eq!(device.channel(1).map(|c| c.mode), Some(5));
    assert_eq!(device.channel(3).map(|c| c.mode), Some(1));
}
