use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use reef_core::{App, Snapshot, Theme};
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "reef_session";
pub const ROOT_ELEMENT_ID: &str = "reef-root";
pub const INITIAL_DATA_ID: &str = "reef-initial-data";

#[derive(Clone)]
pub struct ServerState {
    pub app: App,
}

impl ServerState {
    pub fn new(app: App) -> Self {
        Self { app }
    }
}

pub async fn health(State(state): State<ServerState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.app.live_count(),
    }))
}

pub async fn index(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    render_page(&state, "/", &headers).await
}

pub async fn page(
    State(state): State<ServerState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    render_page(&state, &path, &headers).await
}

async fn render_page(state: &ServerState, path: &str, headers: &HeaderMap) -> Response {
    let (session_id, fresh) = match session_from_cookie(headers) {
        Some(id) => (id, false),
        None => (Uuid::new_v4().to_string(), true),
    };

    let Some(snapshot) = state.app.render_bootstrap(path, &session_id).await else {
        debug!(%path, "no page registered");
        return (StatusCode::NOT_FOUND, Html(not_found_html(path))).into_response();
    };

    let html = match bootstrap_html(state.app.name(), &snapshot, &session_id, path, &state.app.theme()) {
        Ok(html) => html,
        Err(err) => {
            error!(%path, error = %err, "failed to encode bootstrap payload");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Html(html).into_response();
    if fresh {
        let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
            Err(err) => warn!(error = %err, "failed to set session cookie"),
        }
    }
    response
}

/// Session id carried by the `reef_session` cookie, if present and well formed.
pub fn session_from_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| is_valid_session_id(value))
}

pub fn is_valid_session_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// HTML shell for a page load: mount element, the rendered root snapshot as
/// inline JSON, and globals for the session id, path and theme.
pub fn bootstrap_html(
    title: &str,
    snapshot: &Snapshot,
    session_id: &str,
    path: &str,
    theme: &Theme,
) -> Result<String, serde_json::Error> {
    let data = escape_script(&serde_json::to_string(snapshot)?);
    let session = escape_script(&serde_json::to_string(session_id)?);
    let path = escape_script(&serde_json::to_string(path)?);
    let theme = escape_script(&serde_json::to_string(theme)?);
    let title = escape_html(title);
    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<div id="{ROOT_ELEMENT_ID}"></div>
<script id="{INITIAL_DATA_ID}" type="application/json">{data}</script>
<script>
window.__REEF_SESSION__ = {session};
window.__REEF_PATH__ = {path};
window.__REEF_THEME__ = {theme};
</script>
</body>
</html>
"#
    ))
}

fn not_found_html(path: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body><h1>Not found</h1><p>No page at {}</p></body></html>",
        escape_html(path)
    )
}

// Keeps `</script>` inside JSON from closing the tag early.
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
