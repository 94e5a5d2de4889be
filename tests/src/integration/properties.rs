//! # Dispatcher and Registry Guarantees
//!
//! - Ids are unique among outstanding calls
//! - A reply that lands before anyone waits is returned without waiting
//! - Polling and waiting agree on the payload
//! - Concurrent callers never see each other's replies
//! - Duplicate replies are harmless

#[cfg(test)]
mod tests {
    use crate::harness::{client_on, Behaviour, Responder};
    use amqp_rpc::{CorrelationId, CorrelationRegistry, InMemoryBroker};
    use bytes::Bytes;
    use futures::future::join_all;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_no_cross_delivery() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::Echo);
        let client = Arc::new(client_on(&broker).await);

        let callers = (0..200).map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let body = format!("caller-{i}");
                let id = client.send(body.clone(), "requests").await.unwrap();
                let reply = client.await_response(&id, Duration::from_secs(10)).await;
                (id, body, reply)
            })
        });

        let mut ids = HashSet::new();
        for outcome in join_all(callers).await {
            let (id, body, reply) = outcome.unwrap();
            assert!(ids.insert(id), "duplicate id {id}");
            assert_eq!(reply, Some(Bytes::from(body)));
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_outstanding_ids_are_unique() {
        let broker = InMemoryBroker::new();
        let _inbox = broker.take_requests();
        let client = client_on(&broker).await;

        let mut ids = HashSet::new();
        for _ in 0..1_000 {
            assert!(ids.insert(client.send("x", "requests").await.unwrap()));
        }
        assert_eq!(client.pending_count(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fulfil_before_wait_returns_immediately() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        registry.register(id).unwrap();
        registry.fulfil(&id, Bytes::from_static(b"early"));

        let started = Instant::now();
        let reply = registry.wait(&id, Duration::from_secs(30)).await;

        assert_eq!(reply.unwrap().payload, Bytes::from_static(b"early"));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reply_racing_ahead_of_wait_is_not_lost() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::Echo);
        let client = client_on(&broker).await;

        let id = client.send("fast", "requests").await.unwrap();
        // Let the worker and pump run before anyone waits.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let reply = client.await_response(&id, Duration::from_secs(5)).await;
        assert_eq!(reply, Some(Bytes::from_static(b"fast")));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_get_response_never_blocks() {
        let broker = InMemoryBroker::new();
        let _inbox = broker.take_requests();
        let client = client_on(&broker).await;
        let id = client.send("slow", "requests").await.unwrap();

        let started = std::time::Instant::now();
        assert!(client.get_response(&id).is_none());
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(client.pending_count(), 1, "unanswered call stays registered");
    }

    #[tokio::test]
    async fn test_poll_and_wait_agree() {
        let registry = Arc::new(CorrelationRegistry::new());
        let id = CorrelationId::new();
        registry.register(id).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait(&id, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        registry.fulfil(&id, Bytes::from_static(b"same"));

        let waited = waiter.await.unwrap().map(|r| r.payload);
        assert_eq!(waited, Some(Bytes::from_static(b"same")));

        // Consumed by the waiter: a later poll finds nothing to hand out twice.
        assert!(registry.take(&id).is_none());

        let other = CorrelationId::new();
        registry.register(other).unwrap();
        registry.fulfil(&other, Bytes::from_static(b"polled"));
        assert_eq!(
            registry.take(&other).map(|r| r.payload),
            Some(Bytes::from_static(b"polled"))
        );
        assert!(registry.wait(&other, Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_replies_do_not_stop_the_pump() {
        let broker = InMemoryBroker::new();
        let _worker = Responder::spawn(&broker, Behaviour::Twice);
        let client = client_on(&broker).await;

        let first = client.send("one", "requests").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Last write wins.
        assert_eq!(client.get_response(&first), Some(Bytes::from_static(b"one")));

        let second = client.send("two", "requests").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.get_response(&second), Some(Bytes::from_static(b"two")));
        assert_eq!(
            client.stats().total_duplicate_replies.load(Ordering::Relaxed),
            2
        );
    }
}
