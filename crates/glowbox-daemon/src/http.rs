//! HTTP control surface.
//!
//! A deliberately thin layer: every route translates straight into a player
//! command (or a status read) and reports the outcome as plain text / JSON.
//! Playback policy lives in the player loop, not here.

use std::path::PathBuf;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use glowbox_proto::protocol::Source;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::library;
use crate::player::{PlayerHandle, VolumeChange};

#[derive(Clone)]
struct HttpState {
    player: PlayerHandle,
    library_dir: PathBuf,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    player: PlayerHandle,
    library_dir: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let app = Router::new()
            .route("/", get(index))
            .route("/play", get(play))
            .route("/play_local", get(play_local))
            .route("/pause", get(pause))
            .route("/resume", get(resume))
            .route("/stop", get(stop))
            .route("/volume", get(volume))
            .route("/library", get(list_library))
            .route("/status", get(status))
            .layer(CorsLayer::permissive())
            .with_state(HttpState {
                player,
                library_dir,
            });

        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("failed to bind control server {}: {}", addr, e);
                return;
            }
        };

        info!("control server listening at {}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            error!("control server exited: {}", e);
        }
    })
}

fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::SourceNotFound(_) => StatusCode::NOT_FOUND,
        Error::Spawn { .. } | Error::BinaryMissing { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

// ── handlers ──────────────────────────────────────────────────────────────────

const INDEX_HTML: &str = r#"<html><body>
<h1>glowbox</h1>
<h2>Remote</h2>
<form action='/play' method='get'>
  <input type='text' name='url' placeholder='media URL' size='50'/>
  <input type='submit' value='Play'/>
</form>
<h2>Local library</h2>
<a href='/library'>Browse library</a>
<br><br>
<button onclick="location.href='/pause'">Pause</button>
<button onclick="location.href='/resume'">Resume</button>
<button onclick="location.href='/stop'">Stop</button>
<button onclick="location.href='/volume?value=up'">Vol +</button>
<button onclick="location.href='/volume?value=down'">Vol -</button>
</body></html>
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Deserialize)]
struct PlayParams {
    url: String,
}

async fn play(State(st): State<HttpState>, Query(params): Query<PlayParams>) -> Response {
    if params.url.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing url").into_response();
    }
    let source = Source::Remote { url: params.url };
    match st.player.play(source.clone()).await {
        Ok(()) => format!("playing: {}", source.describe()).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct PlayLocalParams {
    file: String,
}

async fn play_local(
    State(st): State<HttpState>,
    Query(params): Query<PlayLocalParams>,
) -> Response {
    let Some(path) = library::resolve(&st.library_dir, &params.file) else {
        return (StatusCode::BAD_REQUEST, "invalid file name").into_response();
    };
    match st.player.play(Source::Local { path }).await {
        Ok(()) => format!("playing local file: {}", params.file).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn pause(State(st): State<HttpState>) -> Response {
    match st.player.pause().await {
        Ok(()) => "paused".into_response(),
        Err(e) => error_response(&e),
    }
}

async fn resume(State(st): State<HttpState>) -> Response {
    match st.player.resume().await {
        Ok(()) => "resumed".into_response(),
        Err(e) => error_response(&e),
    }
}

async fn stop(State(st): State<HttpState>) -> Response {
    match st.player.stop().await {
        Ok(()) => "stopped".into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct VolumeParams {
    value: String,
}

async fn volume(State(st): State<HttpState>, Query(params): Query<VolumeParams>) -> Response {
    let change = match params.value.as_str() {
        "up" => VolumeChange::Up,
        "down" => VolumeChange::Down,
        raw => match raw.parse::<f32>() {
            Ok(v) => VolumeChange::Set(v),
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "value must be up, down, or a number")
                    .into_response()
            }
        },
    };
    match st.player.set_volume(change).await {
        Ok(applied) => format!("volume: {:.1}", applied).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_library(State(st): State<HttpState>) -> Json<Vec<String>> {
    Json(library::list_files(&st.library_dir).await)
}

async fn status(State(st): State<HttpState>) -> Response {
    Json(st.player.status()).into_response()
}
