use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::ApiError;
use crate::ingest::Ingestor;
use crate::platform::green_api::GreenApiClient;

// Embedded at compile time so the binary has no runtime asset directory.
const CONTACTS_HTML: &str = include_str!("../templates/contacts.html");

/// Last contacts response, reused until it is older than `ttl`.
pub struct ContactsCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, Value)>>,
}

impl ContactsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The lock is held across the upstream call, so concurrent misses
    /// trigger a single request.
    pub async fn get_or_fetch(&self, api: &GreenApiClient) -> Result<Value, ApiError> {
        let mut entry = self.entry.lock().await;
        if let Some((fetched_at, contacts)) = entry.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(contacts.clone());
            }
        }

        let contacts = api.get_contacts().await?;
        *entry = Some((Instant::now(), contacts.clone()));
        Ok(contacts)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub api: Arc<GreenApiClient>,
    pub contacts: Arc<ContactsCache>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
    status: &'static str,
}

type ApiFailure = (StatusCode, Json<ErrorResponse>);

fn failure(status: StatusCode, detail: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ErrorResponse {
            detail: detail.into(),
            status: "error",
        }),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chats", get(get_chats))
        .route("/contacts", get(contacts_page))
        .route("/webhook", post(receive_webhook))
        .with_state(state)
}

/// Serve the router on `bind` until the task is dropped.
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!("Web server listening on http://{}", bind);

    axum::serve(listener, router(state))
        .await
        .context("Web server error")
}

async fn health() -> &'static str {
    "ok"
}

async fn contacts_page() -> Html<&'static str> {
    Html(CONTACTS_HTML)
}

async fn get_chats(State(state): State<AppState>) -> Result<Json<Value>, ApiFailure> {
    if !state.api.config().is_configured() {
        return Err(failure(
            StatusCode::SERVICE_UNAVAILABLE,
            "Chat API credentials are not configured",
        ));
    }

    match state.contacts.get_or_fetch(&state.api).await {
        Ok(contacts) => Ok(Json(contacts)),
        Err(ApiError::Request(e)) => {
            error!("Contacts request failed: {}", e);
            Err(failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error occurred while requesting data: {e}"),
            ))
        }
        Err(ApiError::Status(status)) => {
            error!("Contacts request returned {}", status);
            Err(failure(status, "Failed to fetch data from external API"))
        }
    }
}

/// Push delivery: accept the event and ingest it in the background.
async fn receive_webhook(State(state): State<AppState>, Json(body): Json<Value>) -> StatusCode {
    drop(state.ingestor.dispatch(body));
    StatusCode::OK
}
