//! Sample application served by the binary: a counter with partial refresh,
//! a synced text input, a shared theme toggle and a background job.

use std::sync::Arc;
use std::time::Duration;

use reef_core::{
    App, AppConfig, CallbackArgs, Context, Node, ServerMessage, SessionStore, Theme, ToastVariant,
};
use serde_json::{json, Value};

const JOB_STEPS: u32 = 5;
const JOB_TICK: Duration = Duration::from_millis(400);

pub fn build_app(store: Arc<dyn SessionStore>, config: AppConfig) -> App {
    let app = App::new("Reef demo", store, config);
    app.page("/", home_page);
    app.page("/about", about_page);
    app.on_event("announce", |ctx, args| async move {
        let text = args.str("message").unwrap_or("hello everyone").to_string();
        let reached = ctx.app().broadcast(ServerMessage::Toast {
            message: text,
            variant: ToastVariant::Info,
            duration: Some(3_000),
        });
        tracing::debug!(reached, "announcement sent");
        Ok(())
    });
    app
}

fn home_page(ctx: &Context) -> Node {
    let count = ctx.get_state_as::<i64>("count").unwrap_or(0);
    let name = ctx.get_state_as::<String>("name").unwrap_or_default();
    let running = ctx.get_state_as::<bool>("job_running").unwrap_or(false);

    Node::container()
        .id("home")
        .gap(16)
        .child(counter_panel(ctx, count))
        .child(
            Node::row()
                .id("greeting")
                .gap(8)
                .child(
                    Node::input(name)
                        .id("name-input")
                        .placeholder_text("Your name")
                        .save(ctx.save_prop("name", Some(300))),
                )
                .child(Node::button("Greet").id("greet").on_click(ctx.callback(greet, Value::Null))),
        )
        .child(
            Node::row()
                .id("job")
                .gap(8)
                .child(
                    Node::button("Start job")
                        .id("job-button")
                        .disabled(running)
                        .on_click(ctx.callback(start_job, Value::Null)),
                )
                .child(Node::text(if running { "running" } else { "idle" }).id("job-status")),
        )
        .child(
            Node::row()
                .id("nav")
                .gap(8)
                .child(
                    Node::button("Toggle theme")
                        .id("theme-toggle")
                        .variant("secondary")
                        .on_click(ctx.callback(toggle_theme, Value::Null)),
                )
                .child(
                    Node::button("About")
                        .id("to-about")
                        .variant("link")
                        .on_click(ctx.callback(go_to, json!({"path": "/about"}))),
                ),
        )
}

fn counter_panel(ctx: &Context, count: i64) -> Node {
    Node::row()
        .id("counter-panel")
        .gap(8)
        .child(Node::text(count).id("count"))
        .child(
            Node::button("+1")
                .id("inc")
                .on_click(ctx.callback(increment, json!({"step": 1}))),
        )
        .child(
            Node::button("+5")
                .id("inc-5")
                .on_click(ctx.callback(increment, json!({"step": 5}))),
        )
        .child(
            Node::button("Reset")
                .id("reset")
                .variant("danger")
                .on_click(ctx.callback(reset, Value::Null)),
        )
}

fn about_page(ctx: &Context) -> Node {
    Node::container()
        .id("about")
        .child(Node::text("Reef renders this page on the server.").id("about-text"))
        .child(
            Node::placeholder(Node::text("Loading stats...").id("stats-loading"))
                .id("stats"),
        )
        .child(
            Node::button("Back")
                .id("to-home")
                .on_click(ctx.callback(go_to, json!({"path": "/"}))),
        )
}

async fn increment(ctx: Context, args: CallbackArgs) -> anyhow::Result<()> {
    let step = args.get_as::<i64>("step").unwrap_or(1);
    let count = ctx.update_state(|state| {
        let next = state.get_as::<i64>("count").unwrap_or(0) + step;
        state.set("count", next);
        next
    });
    ctx.update_text("count", count.to_string());
    Ok(())
}

async fn reset(ctx: Context, _args: CallbackArgs) -> anyhow::Result<()> {
    ctx.set_state("count", 0);
    ctx.refresh(Some("counter-panel"), None);
    ctx.show_toast("Counter reset", ToastVariant::Info);
    Ok(())
}

async fn greet(ctx: Context, _args: CallbackArgs) -> anyhow::Result<()> {
    let name = ctx.get_state_as::<String>("name").unwrap_or_default();
    if name.trim().is_empty() {
        ctx.show_toast("Type a name first", ToastVariant::Warning);
    } else {
        ctx.show_toast(format!("Hello, {}!", name.trim()), ToastVariant::Success);
    }
    Ok(())
}

async fn toggle_theme(ctx: Context, _args: CallbackArgs) -> anyhow::Result<()> {
    let next = if ctx.app().theme().name == "dark" {
        Theme::default()
    } else {
        Theme::new("dark")
            .with_token("mode", "dark")
            .with_token("primary", "#66d9e8")
    };
    let reached = ctx.broadcast_theme(next);
    tracing::debug!(reached, "theme broadcast");
    Ok(())
}

async fn go_to(ctx: Context, args: CallbackArgs) -> anyhow::Result<()> {
    let path = args
        .str("path")
        .ok_or_else(|| anyhow::anyhow!("navigation without a path"))?
        .to_string();
    ctx.navigate(&path);
    ctx.refresh(None, None);
    Ok(())
}

async fn start_job(ctx: Context, _args: CallbackArgs) -> anyhow::Result<()> {
    let already_running = ctx.update_state(|state| {
        let running = state.get_as::<bool>("job_running").unwrap_or(false);
        state.set("job_running", true);
        running
    });
    if already_running {
        ctx.show_toast("A job is already running", ToastVariant::Warning);
        return Ok(());
    }
    ctx.update_props("job-button", json!({"disabled": true}));

    let job = ctx.clone();
    ctx.spawn(async move {
        let stop = job.stop_flag();
        for step in 1..=JOB_STEPS {
            tokio::time::sleep(JOB_TICK).await;
            if stop.is_stopped() {
                break;
            }
            job.update_text("job-status", format!("step {step}/{JOB_STEPS}"));
        }
        job.set_state("job_running", false);
        if job.is_connected() {
            job.update_props("job-button", json!({"disabled": false}));
            job.update_text("job-status", "idle");
            job.show_toast("Job finished", ToastVariant::Success);
        }
        Ok(())
    });
    Ok(())
}
