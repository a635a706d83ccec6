use std::convert::Infallible;
use std::time::Duration;

use futures::channel::mpsc;
use reef_core::session;
use reef_core::{
    App, AppConfig, Context, DispatchMode, MemoryStore, Node, Outbox, ServerMessage, ToastVariant,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

type Frames = mpsc::UnboundedReceiver<Result<String, Infallible>>;

fn frames(messages: &[Value]) -> Frames {
    let (tx, rx) = mpsc::unbounded();
    for message in messages {
        tx.unbounded_send(Ok(message.to_string())).unwrap();
    }
    rx
}

fn raw_frames(texts: &[&str]) -> Frames {
    let (tx, rx) = mpsc::unbounded();
    for text in texts {
        tx.unbounded_send(Ok(text.to_string())).unwrap();
    }
    rx
}

fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn counter_app(mode: DispatchMode) -> App {
    let app = App::new(
        "counter",
        MemoryStore::new(),
        AppConfig {
            session_ttl: Duration::from_secs(300),
            dispatch_mode: mode,
        },
    );
    app.page("/", |ctx| {
        let count = ctx.get_state_as::<i64>("count").unwrap_or(0);
        let increment = ctx.callback(
            |ctx, args| async move {
                let step = args.get_as::<i64>("step").unwrap_or(1);
                let next = ctx.update_state(|state| {
                    let next = state.get_as::<i64>("count").unwrap_or(0) + step;
                    state.set("count", next);
                    next
                });
                ctx.update_text("count", next.to_string());
                Ok(())
            },
            json!({"step": 2}),
        );
        Node::container()
            .id("root")
            .child(Node::text(count).id("count"))
            .child(Node::button("+2").id("inc").on_click(increment))
    });
    app.page("/about", |_ctx| Node::text("about reef").id("about"));
    app
}

async fn connect(app: &App) -> (Context, UnboundedReceiver<ServerMessage>) {
    let (outbox, rx) = Outbox::channel();
    let ctx = session::connect(app, "session-1", "/", outbox).await;
    (ctx, rx)
}

#[test_timeout::tokio_timeout_test]
async fn callback_round_trip_uses_bound_args() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, mut rx) = connect(&app).await;

    let tree = app.build_page("/", &ctx).unwrap();
    let snapshot = tree.render().into_value();
    let on_click = &snapshot["children"][1]["props"]["onClick"];
    let callback_id = on_click["callbackId"].as_str().unwrap().to_string();
    assert_eq!(on_click["boundArgs"], json!({"step": 2}));

    let input = frames(&[
        json!({"type": "callback", "callbackId": callback_id, "boundArgs": {"step": 100}}),
        json!({"type": "callback", "callbackId": callback_id}),
    ]);
    session::run(ctx.clone(), input).await;

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerMessage::update_text("count", "2"),
            ServerMessage::update_text("count", "4"),
        ]
    );
    assert_eq!(ctx.get_state_as::<i64>("count"), Some(4));
}

#[test_timeout::tokio_timeout_test]
async fn handler_faults_do_not_end_the_loop() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, mut rx) = connect(&app).await;
    let failing = ctx.callback(
        |_ctx, _args| async move { Err(anyhow::anyhow!("handler exploded")) },
        Value::Null,
    );
    let panicking = ctx.callback(
        |_ctx, args| async move {
            if args.is_empty() {
                panic!("handler panicked");
            }
            Ok(())
        },
        Value::Null,
    );

    let input = frames(&[
        json!({"type": "callback", "callbackId": failing.callback_id}),
        json!({"type": "callback", "callbackId": panicking.callback_id}),
        json!({"type": "callback", "callbackId": "no-such-callback"}),
        json!({"type": "ping"}),
    ]);
    session::run(ctx, input).await;

    assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);
}

#[test_timeout::tokio_timeout_test]
async fn malformed_frames_get_an_error_reply() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, mut rx) = connect(&app).await;

    session::run(
        ctx,
        raw_frames(&["{not json", r#"{"type":"warp"}"#, r#"{"type":"ping"}"#]),
    )
    .await;

    let messages = drain(&mut rx);
    assert_eq!(messages.len(), 3);
    assert!(matches!(messages[0], ServerMessage::Error { .. }));
    assert!(matches!(messages[1], ServerMessage::Error { .. }));
    assert_eq!(messages[2], ServerMessage::Pong);
}

#[test_timeout::tokio_timeout_test]
async fn navigate_refreshes_the_new_page() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, mut rx) = connect(&app).await;

    session::run(
        ctx.clone(),
        frames(&[json!({"type": "navigate", "path": "/about"})]),
    )
    .await;

    assert_eq!(ctx.current_path(), "/about");
    match drain(&mut rx).as_slice() {
        [ServerMessage::Refresh { component }] => {
            assert_eq!(component.id, "about");
            assert_eq!(component.text(), "about reef");
        }
        other => panic!("unexpected messages {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn custom_events_reach_app_handlers() {
    let app = counter_app(DispatchMode::Inline);
    app.on_event("greet", |ctx, args| async move {
        let name = args.str("name").unwrap_or("stranger").to_string();
        ctx.show_toast(format!("hello {name}"), ToastVariant::Success);
        Ok(())
    });
    let (ctx, mut rx) = connect(&app).await;

    session::run(
        ctx,
        frames(&[
            json!({"type": "custom", "name": "greet", "data": {"name": "Ada"}}),
            json!({"type": "custom", "name": "unknown"}),
        ]),
    )
    .await;

    assert_eq!(
        drain(&mut rx),
        vec![ServerMessage::Toast {
            message: "hello Ada".into(),
            variant: ToastVariant::Success,
            duration: None,
        }]
    );
}

#[test_timeout::tokio_timeout_test]
async fn state_survives_reconnection() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, _rx) = connect(&app).await;

    session::run(
        ctx,
        frames(&[
            json!({"type": "state_sync", "key": "name", "value": "Grace"}),
            json!({"type": "state_sync", "key": "count", "value": 9}),
        ]),
    )
    .await;
    assert_eq!(app.live_count(), 0);

    let (next, mut rx) = connect(&app).await;
    assert_eq!(next.get_state_as::<String>("name").as_deref(), Some("Grace"));
    session::run(next, frames(&[json!({"type": "store_init"})])).await;
    let expected = json!({"name": "Grace", "count": 9})
        .as_object()
        .cloned()
        .unwrap();
    assert_eq!(
        drain(&mut rx),
        vec![ServerMessage::StoreSnapshot { state: expected }]
    );

    let snapshot = app.render_bootstrap("/", "session-1").await.unwrap();
    assert!(snapshot.contains("count"));
    assert_eq!(snapshot.into_value()["children"][0]["children"][0], json!("9"));
}

#[test_timeout::tokio_timeout_test]
async fn concurrent_mode_keeps_reading_while_handlers_run() {
    let app = counter_app(DispatchMode::Concurrent);
    let (ctx, mut rx) = connect(&app).await;
    let slow = ctx.callback(
        |ctx, _args| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.update_text("status", "done");
            Ok(())
        },
        Value::Null,
    );

    session::run(
        ctx,
        frames(&[
            json!({"type": "callback", "callbackId": slow.callback_id}),
            json!({"type": "ping"}),
        ]),
    )
    .await;

    assert_eq!(rx.recv().await, Some(ServerMessage::Pong));
    assert_eq!(
        rx.recv().await,
        Some(ServerMessage::update_text("status", "done"))
    );
}

#[test_timeout::tokio_timeout_test]
async fn inline_mode_processes_in_order() {
    let app = counter_app(DispatchMode::Inline);
    let (ctx, mut rx) = connect(&app).await;
    let slow = ctx.callback(
        |ctx, _args| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.update_text("status", "done");
            Ok(())
        },
        Value::Null,
    );

    session::run(
        ctx,
        frames(&[
            json!({"type": "callback", "callbackId": slow.callback_id}),
            json!({"type": "ping"}),
        ]),
    )
    .await;

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerMessage::update_text("status", "done"),
            ServerMessage::Pong
        ]
    );
}

#[test_timeout::timeout]
fn concurrent_mode_applies_state_frames_in_order() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        for round in 0..25 {
            let app = counter_app(DispatchMode::Concurrent);
            let (ctx, mut rx) = connect(&app).await;
            let mut messages: Vec<Value> = (0..20)
                .map(|value| json!({"type": "state_sync", "key": "k", "value": value}))
                .collect();
            messages.push(json!({"type": "store_init"}));
            messages.push(json!({"type": "ping"}));

            session::run(ctx, frames(&messages)).await;

            let expected = json!({"k": 19}).as_object().cloned().unwrap();
            assert_eq!(
                drain(&mut rx),
                vec![
                    ServerMessage::StoreSnapshot { state: expected },
                    ServerMessage::Pong
                ],
                "round {round}"
            );
            let (next, _rx) = connect(&app).await;
            assert_eq!(next.get_state("k"), Some(json!(19)), "round {round}");
        }
    });
}
