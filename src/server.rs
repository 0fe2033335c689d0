use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse},
    routing::{delete, get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::chat::{DisplayList, PageOutcome, Provenance, SendOutcome, now_millis};
use crate::config::AppConfig;
use crate::error::{ChatError, Result};
use crate::events::build_sse_response;
use crate::feed::{FeedService, MemoryFeed, MessageId, NewMessage};
use crate::render;
use crate::views::ViewStore;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let feed = MemoryFeed::with_subscriber_buffer(config.feed.event_buffer.max(1));
    seed_demo_messages(&feed, config.feed.seed_demo_messages).await?;

    let settings = config.feed.view_settings();
    info!(
        name: "feed.config.loaded",
        message_limit = settings.message_limit,
        page_delay_ms = settings.page_delay.as_millis() as u64,
        "Feed configuration loaded"
    );

    let views = ViewStore::new(Arc::new(feed), settings);
    spawn_idle_sweeper(views.clone(), config.server.view_idle_timeout());

    let state = AppState {
        views,
        config: Arc::clone(&config),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Routes for the chat page and its view API.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = state.config.server.request_timeout();

    Router::new()
        .route("/", get(index_handler))
        .route("/api/views", post(mount_view))
        .route("/api/views/{id}", delete(unmount_view))
        .route("/api/views/{id}/messages", get(get_messages).post(send_message))
        .route("/api/views/{id}/messages/html", get(get_messages_html))
        .route("/api/views/{id}/messages/{message_id}", delete(delete_message))
        .route("/api/views/{id}/older", post(fetch_older))
        .route("/api/views/{id}/stream", get(view_stream))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_elapsed) => {
                        (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                    }
                }
            },
        ))
        .with_state(state)
}

/// Fill an empty feed with `count` messages, one minute apart, ending now.
async fn seed_demo_messages(feed: &MemoryFeed, count: u32) -> anyhow::Result<()> {
    if count == 0 {
        return Ok(());
    }
    let now = now_millis();
    for n in 1..=count {
        let date = now - i64::from(count - n) * 60_000;
        feed.create(NewMessage::new(format!("Message {n}"), date))
            .await?;
    }
    info!(name: "feed.seeded", count, "Demo messages seeded");
    Ok(())
}

fn spawn_idle_sweeper(views: ViewStore, idle_timeout: Duration) {
    let period = (idle_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            views.cleanup_idle(idle_timeout);
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    Html(render::page(&state.config.server.title))
}

// ─────────────────────────────────────────────────────────────────────────────
// View API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Response from mounting a view.
#[derive(Debug, Serialize)]
struct MountResponse {
    view_id: String,
    /// URL for the SSE stream.
    stream_url: String,
    display: DisplayList,
}

/// POST /api/views - Mount a view for a newly opened page.
async fn mount_view(State(state): State<AppState>) -> Result<(StatusCode, Json<MountResponse>)> {
    let view = state.views.mount().await?;
    let view_id = view.id().to_string();
    Ok((
        StatusCode::CREATED,
        Json(MountResponse {
            stream_url: format!("/api/views/{view_id}/stream"),
            display: view.display(),
            view_id,
        }),
    ))
}

/// DELETE /api/views/:id - Unmount a view.
async fn unmount_view(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    match state.views.remove(&id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ChatError::ViewNotFound(id)),
    }
}

/// GET /api/views/:id/messages - Current display list as JSON.
async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DisplayList>> {
    Ok(Json(state.views.require(&id)?.display()))
}

/// GET /api/views/:id/messages/html - Current display list as an HTML fragment.
async fn get_messages_html(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>> {
    let display = state.views.require(&id)?.display();
    Ok(Html(render::message_list(&display, Utc::now())))
}

/// POST /api/views/:id/older - Load the next older page.
async fn fetch_older(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PageOutcome>> {
    let view = state.views.require(&id)?;
    Ok(Json(view.fetch_older_page().await?))
}

/// Request body for sending a message.
#[derive(Debug, Deserialize)]
struct SendRequest {
    text: String,
}

/// POST /api/views/:id/messages - Send the given text.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendOutcome>> {
    let view = state.views.require(&id)?;
    Ok(Json(view.send(req.text).await?))
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    id: MessageId,
    /// Which list held the message, if it was displayed.
    provenance: Option<Provenance>,
}

/// DELETE /api/views/:id/messages/:message_id - Delete a message.
async fn delete_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>> {
    let view = state.views.require(&id)?;
    let message_id = MessageId::new(message_id);
    let provenance = view.delete(&message_id).await?;
    Ok(Json(DeleteResponse {
        id: message_id,
        provenance,
    }))
}

/// GET /api/views/:id/stream - View events as SSE.
async fn view_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let view = state.views.require(&id)?;
    debug!(name: "view.stream.opened", view_id = %id, "Event stream opened");

    let mut rx = view.subscribe_events();
    drop(view);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(view_id = %id, skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!(name: "view.stream.closed", view_id = %id, "Event stream closed");
    };
    Ok(build_sse_response(stream))
}
