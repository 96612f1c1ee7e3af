use super::*;
use crate::domain::types::ContextId;
use futures::StreamExt;
use serde_json::Map;
use std::sync::Mutex;

fn topic() -> Topic {
    Topic::new("tacp:stream:test")
}

#[test]
fn test_record_id_parse_and_order() {
    let id: RecordId = "1700000000000-2".parse().unwrap();
    assert_eq!(id.millis, 1_700_000_000_000);
    assert_eq!(id.seq, 2);
    assert_eq!(id.to_string(), "1700000000000-2");
    assert!(id < "1700000000000-3".parse().unwrap());
    assert!(id < "1700000000001-0".parse().unwrap());
    assert!("garbage".parse::<RecordId>().is_err());
    assert!("12-x".parse::<RecordId>().is_err());
}

#[test]
fn test_encode_errors_are_not_retryable() {
    let encode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(!TransportError::Encode(encode).is_retryable());
    assert!(TransportError::Connection("down".into()).is_retryable());
}

#[tokio::test]
async fn test_append_preserves_order_and_reads_after_cursor() {
    let bus = InMemoryBus::new();
    let t = topic();
    let a = bus.append(&t, "a").await.unwrap();
    let b = bus.append(&t, "b").await.unwrap();
    let c = bus.append(&t, "c").await.unwrap();
    assert!(a < b && b < c);

    let all = bus.read(&t, Cursor::Start, 10, Duration::ZERO).await.unwrap();
    let payloads: Vec<_> = all.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["a", "b", "c"]);

    let after_a = bus
        .read(&t, Cursor::After(a), 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(after_a.len(), 2);
    assert_eq!(after_a[0].id, b);

    let limited = bus.read(&t, Cursor::Start, 1, Duration::ZERO).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_topics_are_independent() {
    let bus = InMemoryBus::new();
    bus.append(&Topic::new("one"), "x").await.unwrap();
    let other = bus
        .read(&Topic::new("two"), Cursor::Start, 10, Duration::ZERO)
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_blocking_read_times_out_empty() {
    let bus = InMemoryBus::new();
    let started = tokio::time::Instant::now();
    let records = bus
        .read(&topic(), Cursor::Start, 10, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(records.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn test_blocking_read_wakes_on_append() {
    let bus = Arc::new(InMemoryBus::new());
    let reader = {
        let bus = bus.clone();
        tokio::spawn(async move {
            bus.read(&topic(), Cursor::Start, 10, Duration::from_secs(30))
                .await
                .unwrap()
        })
    };
    tokio::task::yield_now().await;
    bus.append(&topic(), "late").await.unwrap();
    let records = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader should wake")
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, "late");
}

#[tokio::test]
async fn test_read_recent_is_newest_first_and_tail_skips_backlog() {
    let bus = Arc::new(InMemoryBus::new());
    let t = topic();
    for n in 0..5 {
        bus.append(&t, &n.to_string()).await.unwrap();
    }
    let recent = bus.read_recent(&t, 3).await.unwrap();
    let payloads: Vec<_> = recent.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["4", "3", "2"]);

    let mut consumer = Consumer::from_now(bus.clone(), t.clone()).await.unwrap();
    assert!(consumer
        .next_batch(10, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
    bus.append(&t, "fresh").await.unwrap();
    let batch = consumer.next_batch(10, Duration::ZERO).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload, "fresh");
    assert_eq!(consumer.cursor(), Cursor::After(batch[0].id));
}

#[tokio::test]
async fn test_clear_keeps_ids_increasing() {
    let bus = InMemoryBus::new();
    let t = topic();
    let before = bus.append(&t, "old").await.unwrap();
    bus.clear(&t).await.unwrap();
    assert!(bus.records(&t).is_empty());
    assert_eq!(bus.tail(&t).await.unwrap(), Cursor::Start);
    let after = bus.append(&t, "new").await.unwrap();
    assert!(after > before);
}

#[tokio::test]
async fn test_consumer_stream_is_restartable_from_cursor() {
    let bus = Arc::new(InMemoryBus::new());
    let t = topic();
    for n in 0..4 {
        bus.append(&t, &n.to_string()).await.unwrap();
    }

    let stream = Consumer::new(bus.clone(), t.clone(), Cursor::Start)
        .into_stream(2, Duration::from_millis(10));
    let first_two: Vec<Record> = stream
        .take(2)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(first_two[1].payload, "1");

    let resumed = Consumer::new(bus.clone(), t, Cursor::After(first_two[1].id))
        .into_stream(10, Duration::from_millis(10));
    let rest: Vec<Record> = resumed.take(2).map(|r| r.unwrap()).collect().await;
    let payloads: Vec<_> = rest.iter().map(|r| r.payload.as_str()).collect();
    assert_eq!(payloads, vec!["2", "3"]);
}

#[tokio::test]
async fn test_listen_decodes_messages_and_skips_garbage() {
    let bus = Arc::new(InMemoryBus::new());
    let t = topic();
    let consumer = Consumer::from_now(bus.clone(), t.clone()).await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let seen = seen.clone();
        tokio::spawn(listen(
            consumer,
            PollSettings {
                max_batch: 10,
                block: Duration::from_millis(20),
                error_backoff: Duration::from_millis(10),
            },
            shutdown_rx,
            move |message| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(message.context_id.to_string());
                }
            },
        ))
    };

    bus.append(&t, "not json").await.unwrap();
    let message = Message::user_request(ContextId::from("ctx-1"), Map::new());
    bus.publish(&t, &message).await.unwrap();

    for _ in 0..100 {
        if !seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("listener should stop")
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["ctx-1".to_string()]);
}
