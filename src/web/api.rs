//! Defines the Axum routes for status exposition. Serialization of the
//! snapshot lives here; the board only exposes the pure aggregated state.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Html,
    routing::get,
};

use crate::board::{BoardHandle, BoardSnapshot};

pub type AppState = BoardHandle;

/// Creates the Axum router with the status endpoints.
pub fn create_router(board: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/state", get(get_state))
        .with_state(board)
}

/// Handler returning the board's current aggregated state as JSON.
async fn get_state(State(board): State<AppState>) -> Result<Json<BoardSnapshot>, StatusCode> {
    match board.snapshot().await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn index() -> Html<&'static str> {
    Html(HOME_PAGE)
}

const HOME_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>speedpick</title>
<style>
  body { font-family: monospace; margin: 2em; }
  table { border-collapse: collapse; }
  td, th { border: 1px solid #444; padding: 0.3em 0.8em; }
</style>
</head>
<body>
<h1>speedpick board</h1>
<p id="run">loading…</p>
<table>
  <thead><tr><th>lock</th><th>pick time</th></tr></thead>
  <tbody id="locks"></tbody>
</table>
<script>
async function refresh() {
  const state = await (await fetch('/state')).json();
  document.getElementById('run').textContent = state.running
    ? 'RUNNING since ' + state.started_at
    : 'idle';
  document.getElementById('locks').innerHTML = state.locks.map(l => {
    const time = l.fault ? 'FAULT: ' + l.fault
      : l.pick_duration_ms == null ? '—'
      : (l.pick_duration_ms / 1000).toFixed(2) + ' s';
    return '<tr><td>' + l.name + '</td><td>' + time + '</td></tr>';
  }).join('');
}
refresh();
setInterval(refresh, 500);
</script>
</body>
</html>
"#;
