//! Opens links on the downstream connection.
//!
//! Every open is the same sequential pipeline: begin a session on the
//! connection, then attach the link on that session and wait for the
//! peer's attach. Each link gets a session of its own.

use courier_domain::{
    // ---
    AmqpConnectionPtr,
    Qos,
    ReceiverOptions,
    ReceiverPtr,
    Result,
    SenderOptions,
    SenderPtr,
};

// ---

/// Open a sending link to `address`.
pub async fn open_sender(conn: &AmqpConnectionPtr, address: &str, qos: Qos) -> Result<SenderPtr> {
    // ---
    let session = conn.create_session().await?;
    let sender = session.open_sender(address, SenderOptions { qos }).await?;
    tracing::debug!(link = %sender.name(), address, ?qos, "created sender link");
    Ok(sender)
}

// ---

/// Open a receiving link from `address`.
pub async fn open_receiver(
    conn: &AmqpConnectionPtr,
    address: &str,
    options: ReceiverOptions,
) -> Result<ReceiverPtr> {
    // ---
    let session = conn.create_session().await?;
    let receiver = session.open_receiver(address, options).await?;
    tracing::debug!(
        link = %receiver.name(),
        address,
        qos = ?options.qos,
        prefetch = options.prefetch,
        auto_accept = options.auto_accept,
        "created receiver link"
    );
    Ok(receiver)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::Arc;
    use std::time::Duration;

    use courier_domain::{
        AmqpConnectionPtr, AmqpConnector, ConnectOptions, CourierError, Direction, LinkEndpoint,
        Qos, ReceiverOptions,
    };
    use courier_link_sim::{SimConfig, SimConnector};

    use super::{open_receiver, open_sender};

    // ---

    async fn connect(connector: &SimConnector) -> AmqpConnectionPtr {
        // ---
        let options = ConnectOptions {
            host: "localhost".into(),
            port: 5672,
            container_id: "courier-adapter-test".into(),
            hostname: "courier-internal".into(),
            connect_timeout: Duration::from_millis(100),
        };
        connector.connect(&options).await.expect("connect")
    }

    // ---

    #[tokio::test]
    async fn opens_links_in_their_own_sessions() {
        // ---
        let connector = SimConnector::new(SimConfig::manual());
        let conn = connect(&connector).await;

        let sender = open_sender(&conn, "telemetry.tenantA", Qos::AtMostOnce)
            .await
            .expect("sender");
        let receiver = open_receiver(
            &conn,
            "command.tenantA",
            ReceiverOptions::manual(Qos::AtLeastOnce),
        )
        .await
        .expect("receiver");

        assert_eq!(
            sender.target_address().as_deref(),
            Some("telemetry.tenantA")
        );
        assert_eq!(sender.qos(), Qos::AtMostOnce);
        assert_eq!(
            receiver.source_address().as_deref(),
            Some("command.tenantA")
        );

        let sim = connector.last_connection().expect("connection");
        assert_eq!(sim.session_count(), 2);
    }

    // ---

    #[tokio::test]
    async fn refused_attach_surfaces_error() {
        // ---
        let connector = Arc::new(SimConnector::new(SimConfig::manual()));
        let conn = connect(&connector).await;
        connector
            .last_connection()
            .expect("connection")
            .refuse_next(Direction::Sender);

        let err = open_sender(&conn, "telemetry", Qos::AtLeastOnce)
            .await
            .err()
            .expect("refused");
        assert!(matches!(err, CourierError::LinkOpen(_)));
    }
}
