//! Telemetry forwarding demo - a simulated device link is paired with a
//! downstream sender and an application receiver consumes what arrives.
//!
//! Flow:
//!   1. The application attaches a receiver on the translated address.
//!   2. The device link is served by an upstream-to-downstream adapter.
//!   3. Downstream credit is bridged to the device; it sends its messages
//!      and the application receives them in order.
//!   4. Dispositions are relayed back to the device.
//!   5. The device detaches and its downstream link is closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use courier_domain::{
    // ---
    ConnectionId,
    LinkEndpoint,
    LinkHandle,
    LinkId,
    Message,
    Qos,
    ReceiverOptions,
};
use courier_gateway::{
    // ---
    link_factory,
    ConnectionManagerPtr,
    ForwardingAdapter,
    ForwardingDirection,
    ForwardingLink,
    LinkRegistry,
};
use courier_link_sim::{LinkSpec, SimConnector, SimReceiver};

use crate::wait_until;

// ---

pub async fn run(
    connections: &ConnectionManagerPtr,
    connector: &SimConnector,
    tenant: &str,
    messages: u32,
) -> anyhow::Result<()> {
    // ---
    let adapter = ForwardingAdapter::new(
        ForwardingDirection::UpstreamToDownstream,
        Qos::AtLeastOnce,
        Arc::clone(connections),
        Arc::new(LinkRegistry::new()),
    );

    let client_address = format!("telemetry/{tenant}");
    let downstream_address = connections.config().translate_address(&client_address);

    // --- application side ---------------------------------------------------

    let conn = connections.current_connection()?;
    let application = link_factory::open_receiver(
        &conn,
        &downstream_address,
        ReceiverOptions {
            qos: Qos::AtLeastOnce,
            prefetch: 10,
            auto_accept: true,
        },
    )
    .await?;
    println!("  application receiving on {downstream_address}");

    // --- device side --------------------------------------------------------

    let (receiver, device) = SimReceiver::open(LinkSpec::new().target(client_address.clone()));
    let client = ForwardingLink::new(
        LinkId::new("device-link-1"),
        ConnectionId::new("device-con-1"),
        LinkHandle::Receiver(receiver.clone()),
    );
    println!("  device attaching: {client}");

    let serving = {
        let adapter = Arc::clone(&adapter);
        tokio::spawn(async move { adapter.serve_client(client).await })
    };

    let mut probes = Vec::new();
    for n in 1..=messages {
        wait_until("device credit", || device.credit() > 0).await?;
        probes.push(device.deliver(Message::new(format!("temperature reading {n}")))?);

        let (_, message) = tokio::time::timeout(Duration::from_secs(2), application.recv())
            .await
            .ok()
            .flatten()
            .ok_or_else(|| anyhow!("application receiver got nothing"))?;
        println!("  application received: {}", message.body_text());
    }

    // --- dispositions -------------------------------------------------------

    for (n, probe) in probes.iter().enumerate() {
        let outcome = probe.wait().await.ok_or_else(|| anyhow!("no disposition"))?;
        println!("  message {} disposition: {:?}", n + 1, outcome.state);
    }

    // --- detach -------------------------------------------------------------

    receiver.close(None).await?;
    serving.await??;
    println!(
        "  device detached, paired links left: {}, downstream links opened: {}",
        adapter.registry().len(),
        connector.last_connection().map_or(0, |c| c.senders().len())
    );

    application.close(None).await?;
    Ok(())
}
