//! Downstream connection loss and recovery as seen by the forwarding core.

use std::sync::Arc;
use std::time::Duration;

// ---

use tokio::time::Instant;

// ---

use courier_domain::{
    ConnectionId, ConnectionState, CourierError, LinkHandle, LinkId, OpenState, Qos,
};
use courier_gateway::{
    // ---
    ConnectionManager,
    DownstreamConfig,
    ForwardingAdapter,
    ForwardingDirection,
    ForwardingLink,
    LinkRegistry,
};
use courier_link_sim::{ConnectOutcome, LinkSpec, SimConfig, SimConnector, SimReceiver};

// ---

#[tokio::test(start_paused = true)]
async fn reconnect_after_two_failures_forgets_old_links() {
    // ---
    let connector = Arc::new(SimConnector::new(SimConfig::manual()));
    let cm =
        ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
    cm.connect().await.expect("connect");

    let adapter = ForwardingAdapter::new(
        ForwardingDirection::UpstreamToDownstream,
        Qos::AtLeastOnce,
        cm.clone(),
        Arc::new(LinkRegistry::new()),
    );
    let (receiver, _) = SimReceiver::open(LinkSpec::new().target("telemetry/tenantA"));
    let client = ForwardingLink::new(
        LinkId::new("l1"),
        ConnectionId::new("c1"),
        LinkHandle::Receiver(receiver),
    );
    adapter.on_client_attach(&client).await.expect("attach");

    let old = connector.last_connection().expect("connection");
    let old_sender = old.sender_at("telemetry/tenantA").expect("downstream");
    connector.push_outcomes([ConnectOutcome::Refuse, ConnectOutcome::Refuse]);

    let mut state = cm.state_rx();
    let lost_at = Instant::now();
    old.simulate_disconnect();

    state
        .wait_for(|s| *s != ConnectionState::Connected)
        .await
        .expect("state channel");
    assert!(adapter.registry().is_empty());
    assert_eq!(old_sender.open_state(), OpenState::Closed);

    let err = adapter
        .on_client_attach(&client)
        .await
        .err()
        .expect("reconnecting");
    assert!(matches!(err, CourierError::NotConnected));

    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state channel");

    // Immediate first retry, then two reconnect intervals.
    let elapsed = lost_at.elapsed();
    assert!(
        elapsed >= Duration::from_millis(400),
        "reconnected after {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(600),
        "reconnected after {elapsed:?}"
    );
    assert_eq!(connector.attempts(), 4);
    assert_eq!(connector.connections().len(), 2);

    adapter.on_client_attach(&client).await.expect("re-attach");
    let fresh = connector.last_connection().expect("new connection");
    assert!(fresh.sender_at("telemetry/tenantA").is_some());
    assert_eq!(adapter.registry().len(), 1);
}

// ---

#[tokio::test(start_paused = true)]
async fn start_without_waiting_serves_once_connected() {
    // ---
    let connector = Arc::new(
        SimConnector::new(SimConfig::manual())
            .with_script([ConnectOutcome::Hang, ConnectOutcome::Refuse]),
    );
    let cm =
        ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");
    cm.start().await.expect("start");
    assert!(matches!(
        cm.current_connection(),
        Err(CourierError::NotConnected)
    ));

    let mut state = cm.state_rx();
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state channel");

    assert_eq!(connector.attempts(), 3);
    assert!(cm.current_connection().is_ok());

    cm.shutdown().await;
    assert_eq!(cm.state(), ConnectionState::Disconnected);
    assert!(matches!(
        cm.current_connection(),
        Err(CourierError::NotConnected)
    ));
}

// ---

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_connect_in_flight() {
    // ---
    let connector = Arc::new(SimConnector::new(
        SimConfig::manual().with_connect_delay(Duration::from_millis(50)),
    ));
    let cm =
        ConnectionManager::new(connector.clone(), DownstreamConfig::default()).expect("config");

    let connecting = {
        let cm = cm.clone();
        tokio::spawn(async move { cm.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cm.shutdown().await;

    let outcome = connecting.await.expect("connect task");
    assert!(matches!(outcome, Err(CourierError::Shutdown)));

    // Past the point where the handshake would have completed.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cm.state(), ConnectionState::Disconnected);
    assert!(matches!(
        cm.current_connection(),
        Err(CourierError::NotConnected)
    ));
    assert_eq!(connector.attempts(), 1);
    assert!(connector.connections().is_empty());
}
