//! # Connection Loss and Teardown
//!
//! The broker drops every session (restart, network cut). The client must
//! either reconnect transparently on the next `send` or report the failure;
//! it never hands out an id that cannot be answered without saying so.

#[cfg(test)]
mod tests {
    use crate::harness::{client_on, test_config, Behaviour, Responder};
    use amqp_rpc::{InMemoryBroker, RpcClient, RpcError, TransportError};
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_after_drop_reconnects_transparently() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::PingPong);
        let client = client_on(&broker).await;

        let warmup = client.send("ping-0", "requests").await.unwrap();
        assert!(client.await_response(&warmup, Duration::from_secs(5)).await.is_some());

        broker.drop_connections();

        let id = client.send("ping-1", "requests").await.unwrap();
        assert_eq!(
            client.await_response(&id, Duration::from_secs(5)).await,
            Some(Bytes::from_static(b"pong-1"))
        );
        assert_eq!(client.reconnects(), 1);
        assert_eq!(broker.sessions_opened(), 2);
    }

    #[tokio::test]
    async fn test_send_after_drop_reports_transport_error_when_broker_is_down() {
        let broker = InMemoryBroker::new();
        let client = client_on(&broker).await;

        broker.drop_connections();
        broker.refuse_connections(true);

        match client.send("ping", "requests").await {
            Err(RpcError::Transport(TransportError::Reconnect(_))) => {}
            other => panic!("expected reconnect failure, got {other:?}"),
        }
        assert_eq!(client.pending_count(), 0, "failed send must not leave an entry");
        assert_eq!(broker.published(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_on_live_connection_is_retried() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::PingPong);
        let client = client_on(&broker).await;

        broker.fail_next_publishes(1);

        let id = client.send("ping-1", "requests").await.unwrap();
        assert_eq!(
            client.await_response(&id, Duration::from_secs(5)).await,
            Some(Bytes::from_static(b"pong-1"))
        );
        assert_eq!(client.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_twice_reports_publish_failed() {
        let broker = InMemoryBroker::new();
        let _inbox = broker.take_requests();
        let client = client_on(&broker).await;

        broker.fail_next_publishes(2);

        match client.send("ping", "requests").await {
            Err(RpcError::Transport(TransportError::PublishFailed(_))) => {}
            other => panic!("expected publish failure, got {other:?}"),
        }
        assert_eq!(client.pending_count(), 0, "failed send must not leave an entry");
        assert_eq!(client.reconnects(), 1);

        // The replacement session is healthy once the writes stop failing.
        assert!(client.send("ping", "requests").await.is_ok());
        assert_eq!(client.reconnects(), 1);
    }

    #[tokio::test]
    async fn test_each_send_gets_one_reconnect_attempt() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::Echo);
        let client = client_on(&broker).await;

        broker.drop_connections();
        broker.refuse_connections(true);
        assert!(client.send("a", "requests").await.is_err());
        assert!(client.send("b", "requests").await.is_err());
        assert_eq!(broker.sessions_opened(), 1);

        broker.refuse_connections(false);
        let id = client.send("c", "requests").await.unwrap();
        assert_eq!(
            client.await_response(&id, Duration::from_secs(5)).await,
            Some(Bytes::from_static(b"c"))
        );
    }

    #[tokio::test]
    async fn test_reply_to_a_dropped_session_is_lost_and_times_out() {
        let broker = InMemoryBroker::new();
        let mut inbox = broker.take_requests().unwrap();
        let client = client_on(&broker).await;

        let id = client.send("in-flight", "requests").await.unwrap();
        let request = inbox.recv().await.unwrap();

        broker.drop_connections();
        // The reply queue was auto-deleted with the session.
        assert!(!broker.respond(&request, "too late"));

        assert!(client
            .await_response(&id, Duration::from_millis(50))
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_abandoned_calls() {
        let broker = InMemoryBroker::new();
        let _inbox = broker.take_requests();
        let config = test_config()
            .with_default_timeout(Duration::from_secs(1))
            .with_pending_ttl(Duration::from_secs(2), Duration::from_millis(500));
        let client = RpcClient::with_connector(Arc::new(broker.clone()), config)
            .await
            .unwrap();

        let id = client.send("nobody-home", "requests").await.unwrap();
        assert!(client.await_default(&id).await.is_none());
        assert_eq!(client.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.stats().total_evicted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_close_stops_everything() {
        let broker = InMemoryBroker::new();
        let _inbox = broker.take_requests();
        let client = Arc::new(client_on(&broker).await);

        let id = client.send("pending", "requests").await.unwrap();
        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.await_response(&id, Duration::from_millis(100)).await })
        };

        client.close().await.unwrap();

        assert!(waiter.await.unwrap().is_none());
        assert!(broker.reply_destinations().is_empty());
        assert!(client.reply_destination().await.is_none());
        assert!(matches!(
            client.send("after", "requests").await,
            Err(RpcError::Transport(TransportError::Closed))
        ));
    }
}
