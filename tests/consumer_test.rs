mod common;

use anyhow::{anyhow, Context};
use common::{init_tracing, memory_source, Order, Recorder, User};
use pg_capture_consumer::config::{CaptureInit, TABLE_REGEX_OPTION};
use pg_capture_consumer::source::{Ack, Field, MemorySource, Message, Op, RowChange};
use pg_capture_consumer::{Change, Checkpoint, Consumer, ConsumerState, Error, ModelHandlers};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn recording(recorder: &Recorder<User>) -> ModelHandlers {
    let recorder = recorder.clone();
    ModelHandlers::new().register(move |change: Change<User>| {
        let recorder = recorder.clone();
        async move {
            recorder.record(change);
            anyhow::Ok(())
        }
    })
}

async fn run(consumer: &Consumer<MemorySource>, handlers: ModelHandlers) {
    timeout(Duration::from_secs(5), consumer.consume(handlers))
        .await
        .expect("consume did not finish")
        .expect("consume failed");
}

#[tokio::test]
async fn test_insert_with_text_and_binary_columns() {
    init_tracing();
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    let checkpoint = feed
        .push(RowChange::insert(
            "public",
            "users",
            vec![Field::text("id", "1"), Field::binary("name", "Alice")],
        ))
        .await
        .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    assert_eq!(
        recorder.changes(),
        vec![Change {
            op: Op::Insert,
            lsn: checkpoint.lsn,
            new: Some(User {
                id: 1,
                name: "Alice".to_string(),
                email: None,
            }),
            old: None,
        }]
    );
    assert_eq!(consumer.source().acks(), vec![Ack::Commit(checkpoint)]);
}

#[tokio::test]
async fn test_handler_failure_requeues_with_reason() {
    init_tracing();
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);

    let checkpoint = feed
        .push(RowChange::update(
            "public",
            "users",
            vec![Field::text("id", "1"), Field::text("name", "Bob")],
            vec![Field::text("id", "1"), Field::text("name", "Alice")],
        ))
        .await
        .unwrap();
    feed.close();

    let handlers = ModelHandlers::new()
        .register(|_change: Change<User>| async { Err::<(), _>(anyhow!("db busy")) });
    run(&consumer, handlers).await;

    assert_eq!(
        consumer.source().acks(),
        vec![Ack::Requeue {
            checkpoint,
            reason: "db busy".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_requeue_reason_keeps_error_context() {
    async fn save(change: Change<User>) -> anyhow::Result<()> {
        let user = change.new.context("missing new image")?;
        Err(anyhow!("unique violation")).with_context(|| format!("saving user {}", user.id))
    }

    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    feed.push(RowChange::insert("public", "users", vec![Field::text("id", "7")]))
        .await
        .unwrap();
    feed.close();

    run(&consumer, ModelHandlers::new().register(save)).await;

    match consumer.source().acks().as_slice() {
        [Ack::Requeue { reason, .. }] => assert_eq!(reason, "saving user 7: unique violation"),
        other => panic!("Expected one requeue, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unregistered_tables_and_control_messages_are_committed() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    let begin = feed
        .push(Message::Begin {
            xid: 900,
            final_lsn: 3,
        })
        .await
        .unwrap();
    let orders = feed
        .push(RowChange::insert("public", "orders", vec![Field::text("id", "1")]))
        .await
        .unwrap();
    let truncate = feed
        .push(Message::Truncate {
            tables: vec!["public.users".to_string()],
        })
        .await
        .unwrap();
    let commit = feed
        .push(Message::Commit {
            commit_lsn: 4,
            end_lsn: 5,
        })
        .await
        .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    assert!(recorder.changes().is_empty());
    assert_eq!(
        consumer.source().acks(),
        vec![
            Ack::Commit(begin),
            Ack::Commit(orders),
            Ack::Commit(truncate),
            Ack::Commit(commit),
        ]
    );
}

#[tokio::test]
async fn test_every_event_acknowledged_once_in_order() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);

    let mut pushed = Vec::new();
    for i in 0..50 {
        let message: Message = match i % 5 {
            0 => Message::Begin {
                xid: i,
                final_lsn: 0,
            },
            1 => RowChange::insert("public", "users", vec![Field::text("id", i.to_string())]).into(),
            2 => RowChange::insert("public", "users", vec![Field::text("id", "not a number")]).into(),
            3 => RowChange::delete("public", "audit", vec![Field::text("id", "1")]).into(),
            _ => Message::Commit {
                commit_lsn: 0,
                end_lsn: 0,
            },
        };
        pushed.push(feed.push(message).await.unwrap());
    }
    feed.close();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handlers = ModelHandlers::new().register(move |change: Change<User>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if change.new.map(|u| u.id % 2 == 0).unwrap_or(false) {
                return Err(anyhow!("even ids are rejected"));
            }
            Ok(())
        }
    });
    run(&consumer, handlers).await;

    let acks = consumer.source().acks();
    let acked: Vec<Checkpoint> = acks.iter().map(|a| a.checkpoint().clone()).collect();
    assert_eq!(acked, pushed);

    // malformed ids never reach the handler
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    let requeued = acks
        .iter()
        .filter(|a| matches!(a, Ack::Requeue { .. }))
        .count();
    assert_eq!(requeued, 10 + 5);
}

#[tokio::test]
async fn test_decode_failure_skips_handler_and_names_column() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    let bad = feed
        .push(RowChange::insert(
            "public",
            "users",
            vec![Field::text("id", "abc"), Field::text("name", "Mallory")],
        ))
        .await
        .unwrap();
    let good = feed
        .push(RowChange::insert("public", "users", vec![Field::text("id", "2")]))
        .await
        .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    let acks = consumer.source().acks();
    match &acks[0] {
        Ack::Requeue { checkpoint, reason } => {
            assert_eq!(checkpoint, &bad);
            assert!(reason.contains("\"id\""), "reason was {}", reason);
            assert!(reason.contains("public.users"), "reason was {}", reason);
        }
        other => panic!("Expected requeue, got {:?}", other),
    }
    assert_eq!(acks[1], Ack::Commit(good));
    assert_eq!(recorder.changes().len(), 1);
}

#[tokio::test]
async fn test_nulls_and_unknown_columns() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    feed.push(RowChange::insert(
        "public",
        "users",
        vec![
            Field::text("id", "3"),
            Field::null("name"),
            Field::null("email"),
            Field::text("last_login", "2024-01-01 00:00:00"),
        ],
    ))
    .await
    .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    let changes = recorder.changes();
    assert_eq!(
        changes[0].new,
        Some(User {
            id: 3,
            name: String::new(),
            email: None,
        })
    );
    assert!(matches!(consumer.source().acks()[0], Ack::Commit(_)));
}

#[tokio::test]
async fn test_delete_delivers_old_image_only() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    feed.push(RowChange::delete(
        "",
        "users",
        vec![Field::binary("id", 42i32.to_be_bytes().to_vec())],
    ))
    .await
    .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    let changes = recorder.changes();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].op, Op::Delete);
    assert!(changes[0].new.is_none());
    assert_eq!(changes[0].old.as_ref().map(|u| u.id), Some(42));
}

#[tokio::test]
async fn test_multiple_models_route_by_schema() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    let users = Recorder::new();
    let orders: Recorder<Order> = Recorder::new();

    let order_sink = orders.clone();
    let handlers = recording(&users).register(move |change: Change<Order>| {
        let order_sink = order_sink.clone();
        async move {
            order_sink.record(change);
            anyhow::Ok(())
        }
    });

    feed.push(RowChange::insert(
        "shop",
        "orders",
        vec![
            Field::binary("id", 9i64.to_be_bytes().to_vec()),
            Field::text("total", "19.5"),
            Field::text("tags", r#"{gift,"next day"}"#),
        ],
    ))
    .await
    .unwrap();
    // same table name in another schema is not the model's table
    feed.push(RowChange::insert("public", "orders", vec![Field::text("id", "x")]))
        .await
        .unwrap();
    feed.push(RowChange::insert("public", "users", vec![Field::text("id", "5")]))
        .await
        .unwrap();
    feed.close();

    run(&consumer, handlers).await;

    assert_eq!(
        orders.changes()[0].new,
        Some(Order {
            id: 9,
            total: 19.5,
            tags: vec!["gift".to_string(), "next day".to_string()],
        })
    );
    assert_eq!(users.changes().len(), 1);
    assert!(consumer
        .source()
        .acks()
        .iter()
        .all(|a| matches!(a, Ack::Commit(_))));
}

#[tokio::test]
async fn test_table_regex_limits_delivered_tables() {
    let init = CaptureInit::new("memory://test").with_parameter(TABLE_REGEX_OPTION, "^public\\.users$");
    let (source, mut feed) = MemorySource::new(init).unwrap();
    let consumer = Consumer::new(source);
    let recorder = Recorder::new();

    feed.push(RowChange::insert("public", "audit", vec![Field::text("id", "1")]))
        .await
        .unwrap();
    let user = feed
        .push(RowChange::insert("public", "users", vec![Field::text("id", "1")]))
        .await
        .unwrap();
    feed.close();

    run(&consumer, recording(&recorder)).await;

    assert_eq!(consumer.source().acks(), vec![Ack::Commit(user)]);
}

#[tokio::test]
async fn test_stop_mid_stream_returns_ok() {
    init_tracing();
    let (source, mut feed) = memory_source();
    let consumer = Arc::new(Consumer::new(source));
    let mut state = consumer.state();

    let running = consumer.clone();
    let handle = tokio::spawn(async move {
        running
            .consume(ModelHandlers::new().register(|_change: Change<User>| async {
                anyhow::Ok(())
            }))
            .await
    });

    for i in 0..3 {
        feed.push(RowChange::insert("public", "users", vec![Field::text("id", i.to_string())]))
            .await
            .unwrap();
    }
    consumer.source().wait_for_acks(3).await;
    state
        .wait_for(|s| *s == ConsumerState::Streaming)
        .await
        .unwrap();

    consumer.stop();
    consumer.stop();

    let result = timeout(Duration::from_secs(5), handle)
        .await
        .expect("consume did not return after stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*state.borrow_and_update(), ConsumerState::Stopped);
    assert!(consumer.source().is_stopped());

    let late = feed
        .push(RowChange::insert("public", "users", vec![Field::text("id", "9")]))
        .await;
    assert!(matches!(late, Err(Error::Shutdown)));
    assert_eq!(consumer.source().acks().len(), 3);
}

#[tokio::test]
async fn test_source_failure_is_returned_after_draining() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);

    feed.push(RowChange::insert("public", "users", vec![Field::text("id", "1")]))
        .await
        .unwrap();
    feed.fail("walsender terminated");

    let result = timeout(
        Duration::from_secs(5),
        consumer.consume(ModelHandlers::new().register(|_change: Change<User>| async {
            anyhow::Ok(())
        })),
    )
    .await
    .unwrap();

    assert!(matches!(result, Err(Error::Source { ref message }) if message == "walsender terminated"));
    assert_eq!(consumer.source().acks().len(), 1);
}

#[tokio::test]
async fn test_duplicate_registration_fails_before_streaming() {
    let (source, mut feed) = memory_source();
    let consumer = Consumer::new(source);
    feed.push(RowChange::insert("public", "users", vec![Field::text("id", "1")]))
        .await
        .unwrap();

    let handlers = ModelHandlers::new()
        .register(|_change: Change<User>| async { anyhow::Ok(()) })
        .register(|_change: Change<User>| async { anyhow::Ok(()) });

    match consumer.consume(handlers).await {
        Err(Error::Registration { table, .. }) => assert_eq!(table, "public.users"),
        other => panic!("Expected registration error, got {:?}", other),
    }
    assert!(consumer.source().acks().is_empty());
}
